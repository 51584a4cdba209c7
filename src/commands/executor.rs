//! Command execution.
//!
//! The executor is deliberately thin: validate arity and options, convert
//! argument frames to the store's native types, call the store, build the
//! reply frame. Anything stateful (durability, connection lifecycle) lives
//! in the layers around it, which is what lets the replay path at boot drive
//! the same code with no log attached.

use crate::protocol::Frame;
use crate::storage::{SetCondition, Store};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Commands that mutate state and therefore must reach the append-only log
/// before dispatch.
pub fn is_write_command(name: &str) -> bool {
    matches!(
        name,
        "SET" | "HSET" | "DEL" | "HDEL" | "HDELALL" | "EXPIRE" | "FLUSHDB"
    )
}

/// Everything the server answers, in COMMAND reply order.
const COMMAND_NAMES: &[&str] = &[
    "PING", "ECHO", "GET", "SET", "DEL", "EXISTS", "HSET", "HGET", "HGETALL", "HEXISTS", "HDEL",
    "HDELALL", "HLEN", "FLUSHDB", "EXPIRE", "TTL", "DBSIZE", "INFO", "COMMAND",
];

/// Maps command frames to store operations.
#[derive(Debug, Clone)]
pub struct Executor {
    store: Arc<Store>,
    start_time: Instant,
}

impl Executor {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            start_time: Instant::now(),
        }
    }

    /// Executes one request frame and returns the reply frame.
    ///
    /// Requests must be non-empty arrays; the command name is the first
    /// element, case-insensitive.
    pub fn execute(&self, frame: Frame) -> Frame {
        let items = match frame {
            Frame::Array(items) if !items.is_empty() => items,
            _ => return Frame::error("ERR invalid command format"),
        };

        let name = match items[0].as_bytes().map(std::str::from_utf8) {
            Some(Ok(name)) => name.to_uppercase(),
            _ => return Frame::error("ERR invalid command name"),
        };

        self.dispatch(&name, &items[1..])
    }

    fn dispatch(&self, cmd: &str, args: &[Frame]) -> Frame {
        match cmd {
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "GET" => self.cmd_get(args),
            "SET" => self.cmd_set(args),
            "DEL" => self.cmd_del(args),
            "EXISTS" => self.cmd_exists(args),
            "HSET" => self.cmd_hset(args),
            "HGET" => self.cmd_hget(args),
            "HGETALL" => self.cmd_hgetall(args),
            "HEXISTS" => self.cmd_hexists(args),
            "HDEL" => self.cmd_hdel(args),
            "HDELALL" => self.cmd_hdelall(args),
            "HLEN" => self.cmd_hlen(args),
            "FLUSHDB" => self.cmd_flushdb(args),
            "EXPIRE" => self.cmd_expire(args),
            "TTL" => self.cmd_ttl(args),
            "DBSIZE" => self.cmd_dbsize(args),
            "INFO" => self.cmd_info(args),
            "COMMAND" => self.cmd_command(args),
            other => Frame::error(format!("ERR unknown command '{}'", other)),
        }
    }

    fn cmd_ping(&self, args: &[Frame]) -> Frame {
        match args {
            [] => Frame::simple("PONG"),
            [msg] => match arg_bytes(msg) {
                Some(payload) => Frame::Bulk(payload),
                None => Frame::error("ERR invalid argument"),
            },
            _ => wrong_arity("PING"),
        }
    }

    fn cmd_echo(&self, args: &[Frame]) -> Frame {
        match args {
            [msg] => match arg_bytes(msg) {
                Some(payload) => Frame::Bulk(payload),
                None => Frame::error("ERR invalid argument"),
            },
            _ => wrong_arity("ECHO"),
        }
    }

    fn cmd_get(&self, args: &[Frame]) -> Frame {
        let [key] = args else {
            return wrong_arity("GET");
        };
        let Some(key) = arg_bytes(key) else {
            return Frame::error("ERR invalid key");
        };
        match self.store.get(&key) {
            Some(value) => Frame::Bulk(value),
            None => Frame::Null,
        }
    }

    /// SET key value [NX|XX] [EX seconds|PX milliseconds]
    fn cmd_set(&self, args: &[Frame]) -> Frame {
        if args.len() < 2 {
            return wrong_arity("SET");
        }
        let (Some(key), Some(value)) = (arg_bytes(&args[0]), arg_bytes(&args[1])) else {
            return Frame::error("ERR invalid argument");
        };

        let mut ttl = None;
        let mut cond = SetCondition::Always;

        let mut i = 2;
        while i < args.len() {
            let Some(opt) = arg_str(&args[i]) else {
                return Frame::error("ERR syntax error");
            };
            match opt.to_uppercase().as_str() {
                "NX" if cond == SetCondition::Always => cond = SetCondition::IfAbsent,
                "XX" if cond == SetCondition::Always => cond = SetCondition::IfPresent,
                "NX" | "XX" => return Frame::error("ERR syntax error"),
                "EX" | "PX" => {
                    let unit = opt.to_uppercase();
                    i += 1;
                    let Some(amount) = args.get(i).and_then(arg_i64) else {
                        return Frame::error("ERR syntax error");
                    };
                    if amount < 0 {
                        return Frame::error("ERR invalid expire time");
                    }
                    // zero clears any prior deadline
                    ttl = (amount > 0).then(|| {
                        if unit == "EX" {
                            Duration::from_secs(amount as u64)
                        } else {
                            Duration::from_millis(amount as u64)
                        }
                    });
                }
                _ => return Frame::error("ERR syntax error"),
            }
            i += 1;
        }

        // the condition check and the write share one critical section
        if self.store.set_conditional(key, value, ttl, cond) {
            Frame::ok()
        } else {
            Frame::Null
        }
    }

    fn cmd_del(&self, args: &[Frame]) -> Frame {
        if args.is_empty() {
            return wrong_arity("DEL");
        }
        let Some(keys) = collect_bytes(args) else {
            return Frame::error("ERR invalid key");
        };
        Frame::integer(self.store.del(&keys) as i64)
    }

    fn cmd_exists(&self, args: &[Frame]) -> Frame {
        if args.is_empty() {
            return wrong_arity("EXISTS");
        }
        let Some(keys) = collect_bytes(args) else {
            return Frame::error("ERR invalid key");
        };
        let present = keys.iter().filter(|k| self.store.exists(k)).count();
        Frame::integer(present as i64)
    }

    /// HSET hash field value [field value ...] [ttl-seconds]
    ///
    /// An odd argument count after the hash name means the last argument is
    /// a TTL in seconds applied to every field written.
    fn cmd_hset(&self, args: &[Frame]) -> Frame {
        if args.len() < 3 {
            return wrong_arity("HSET");
        }
        let Some(hash) = arg_bytes(&args[0]) else {
            return Frame::error("ERR invalid key");
        };

        let mut rest = &args[1..];
        let mut ttl = None;
        if rest.len() % 2 == 1 {
            let Some(secs) = arg_i64(&rest[rest.len() - 1]) else {
                return wrong_arity("HSET");
            };
            if secs < 0 {
                return Frame::error("ERR invalid expire time");
            }
            if secs > 0 {
                ttl = Some(Duration::from_secs(secs as u64));
            }
            rest = &rest[..rest.len() - 1];
        }
        if rest.is_empty() {
            return wrong_arity("HSET");
        }

        let mut pairs = Vec::with_capacity(rest.len() / 2);
        for chunk in rest.chunks(2) {
            let (Some(field), Some(value)) = (arg_bytes(&chunk[0]), arg_bytes(&chunk[1])) else {
                return Frame::error("ERR invalid argument");
            };
            pairs.push((field, value));
        }

        Frame::integer(self.store.hset(hash, pairs, ttl) as i64)
    }

    fn cmd_hget(&self, args: &[Frame]) -> Frame {
        let [hash, field] = args else {
            return wrong_arity("HGET");
        };
        let (Some(hash), Some(field)) = (arg_bytes(hash), arg_bytes(field)) else {
            return Frame::error("ERR invalid argument");
        };
        match self.store.hget(&hash, &field) {
            Some(value) => Frame::Bulk(value),
            None => Frame::Null,
        }
    }

    fn cmd_hgetall(&self, args: &[Frame]) -> Frame {
        let [hash] = args else {
            return wrong_arity("HGETALL");
        };
        let Some(hash) = arg_bytes(hash) else {
            return Frame::error("ERR invalid key");
        };
        let mut items = Vec::new();
        for (field, value) in self.store.hgetall(&hash) {
            items.push(Frame::Bulk(field));
            items.push(Frame::Bulk(value));
        }
        Frame::Array(items)
    }

    fn cmd_hexists(&self, args: &[Frame]) -> Frame {
        let [hash, field] = args else {
            return wrong_arity("HEXISTS");
        };
        let (Some(hash), Some(field)) = (arg_bytes(hash), arg_bytes(field)) else {
            return Frame::error("ERR invalid argument");
        };
        Frame::integer(self.store.hexists(&hash, &field) as i64)
    }

    fn cmd_hdel(&self, args: &[Frame]) -> Frame {
        if args.len() < 2 {
            return wrong_arity("HDEL");
        }
        let Some(hash) = arg_bytes(&args[0]) else {
            return Frame::error("ERR invalid key");
        };
        let Some(fields) = collect_bytes(&args[1..]) else {
            return Frame::error("ERR invalid argument");
        };
        Frame::integer(self.store.hdel(&hash, &fields) as i64)
    }

    fn cmd_hdelall(&self, args: &[Frame]) -> Frame {
        let [hash] = args else {
            return wrong_arity("HDELALL");
        };
        let Some(hash) = arg_bytes(hash) else {
            return Frame::error("ERR invalid key");
        };
        Frame::integer(self.store.hdel_all(&hash) as i64)
    }

    fn cmd_hlen(&self, args: &[Frame]) -> Frame {
        let [hash] = args else {
            return wrong_arity("HLEN");
        };
        let Some(hash) = arg_bytes(hash) else {
            return Frame::error("ERR invalid key");
        };
        Frame::integer(self.store.hlen(&hash) as i64)
    }

    fn cmd_flushdb(&self, args: &[Frame]) -> Frame {
        if !args.is_empty() {
            return wrong_arity("FLUSHDB");
        }
        self.store.flushdb();
        Frame::ok()
    }

    /// EXPIRE key seconds — 0 clears the deadline.
    fn cmd_expire(&self, args: &[Frame]) -> Frame {
        let [key, seconds] = args else {
            return wrong_arity("EXPIRE");
        };
        let Some(key) = arg_bytes(key) else {
            return Frame::error("ERR invalid key");
        };
        let Some(secs) = arg_i64(seconds) else {
            return Frame::error("ERR invalid expire time");
        };
        if secs < 0 {
            return Frame::error("ERR invalid expire time");
        }
        let ttl = (secs > 0).then(|| Duration::from_secs(secs as u64));
        Frame::integer(self.store.set_ttl(&key, ttl) as i64)
    }

    fn cmd_ttl(&self, args: &[Frame]) -> Frame {
        let [key] = args else {
            return wrong_arity("TTL");
        };
        let Some(key) = arg_bytes(key) else {
            return Frame::error("ERR invalid key");
        };
        match self.store.ttl(&key) {
            Some(remaining) => Frame::integer(remaining),
            None => Frame::integer(-2),
        }
    }

    fn cmd_dbsize(&self, args: &[Frame]) -> Frame {
        if !args.is_empty() {
            return wrong_arity("DBSIZE");
        }
        Frame::integer(self.store.len() as i64)
    }

    /// INFO [section,section,...]
    fn cmd_info(&self, args: &[Frame]) -> Frame {
        if args.len() > 1 {
            return wrong_arity("INFO");
        }
        let filter: Vec<String> = args
            .first()
            .and_then(arg_str)
            .map(|list| list.to_lowercase().split(',').map(String::from).collect())
            .unwrap_or_default();

        let uptime = self.start_time.elapsed().as_secs();
        let sections = [
            ("server", "emberkv".to_string()),
            ("version", env!("CARGO_PKG_VERSION").to_string()),
            ("uptime", format!("{}s", uptime)),
            ("uptime_secs", uptime.to_string()),
            ("keys", self.store.len().to_string()),
        ];

        let mut out = String::new();
        for (name, value) in sections {
            if filter.is_empty() || filter.iter().any(|f| f == name) {
                out.push_str(name);
                out.push(':');
                out.push_str(&value);
                out.push_str("\r\n");
            }
        }
        Frame::bulk(Bytes::from(out))
    }

    fn cmd_command(&self, _args: &[Frame]) -> Frame {
        Frame::Array(
            COMMAND_NAMES
                .iter()
                .map(|name| Frame::bulk(Bytes::from_static(name.as_bytes())))
                .collect(),
        )
    }
}

fn wrong_arity(cmd: &str) -> Frame {
    Frame::error(format!(
        "ERR wrong number of arguments for '{}' command",
        cmd
    ))
}

fn arg_bytes(arg: &Frame) -> Option<Bytes> {
    match arg {
        Frame::Bulk(b) => Some(b.clone()),
        Frame::Simple(s) => Some(Bytes::from(s.clone())),
        _ => None,
    }
}

fn arg_str(arg: &Frame) -> Option<String> {
    match arg {
        Frame::Bulk(b) => std::str::from_utf8(b).ok().map(String::from),
        Frame::Simple(s) => Some(s.clone()),
        _ => None,
    }
}

fn arg_i64(arg: &Frame) -> Option<i64> {
    match arg {
        Frame::Integer(n) => Some(*n),
        _ => arg_str(arg)?.parse().ok(),
    }
}

fn collect_bytes(args: &[Frame]) -> Option<Vec<Bytes>> {
    args.iter().map(arg_bytes).collect()
}
