//! Command catalog: names, usage, and argument parsing.
//!
//! Each entry turns the JSON arguments of a [`Command`](mesh_core::Command)
//! into a typed [`Invocation`]. Parsing is pure: it checks arity, types
//! and coordinate ranges, and never looks at the live fleet. Whether the
//! referenced nodes exist is the registry's concern.

use std::collections::BTreeMap;

use serde_json::Value;

use mesh_core::protocol::PingRepeat;
use mesh_core::{Host, SyntheticPoint, Transport};

use crate::error::{CommandError, CommandResult};

/// What a parser may depend on.
#[derive(Debug, Clone, Copy)]
pub struct Scope {
    pub range: u32,
    pub transport: Transport,
}

/// A parsed, ready-to-run command.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    AddServer {
        point: SyntheticPoint,
        host: Option<Host>,
    },
    AddServerBundle {
        count: usize,
        hosts: Option<Vec<Host>>,
    },
    RemoveServer {
        id: String,
    },
    SingularQuery {
        src: String,
        dest: String,
    },
    SingularRegion {
        src: String,
        dest: String,
    },
    PingBlock {
        src: String,
        x: f64,
        y: f64,
        message: String,
        repeat: Option<PingRepeat>,
    },
    PingRegion {
        src: String,
        x_start: f64,
        x_end: f64,
        y_start: f64,
        y_end: f64,
        message: String,
        repeat: Option<PingRepeat>,
    },
    ExhaustiveQuery,
    GroupQuery {
        src: String,
    },
    ExhaustiveRegion,
    GroupRegion {
        src: String,
    },
    Performance1 {
        interval_ms: u64,
        duration_ms: u64,
    },
    Performance2 {
        interval_ms: u64,
        duration_ms: u64,
        servers: usize,
    },
    Performance5,
    Performance6,
}

impl Invocation {
    /// Node ids the invocation names explicitly.
    pub fn referenced_ids(&self) -> Vec<&str> {
        match self {
            Invocation::SingularQuery { src, dest } | Invocation::SingularRegion { src, dest } => {
                vec![src.as_str(), dest.as_str()]
            }
            Invocation::PingBlock { src, .. }
            | Invocation::PingRegion { src, .. }
            | Invocation::GroupQuery { src }
            | Invocation::GroupRegion { src } => vec![src.as_str()],
            _ => Vec::new(),
        }
    }
}

type Parser = fn(&Args<'_>) -> CommandResult<Invocation>;

/// One catalog entry.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    /// The command changes the fleet or runs for a long time.
    pub blocking: bool,
    pub usage: &'static str,
    /// Usage when nodes run on remote machines, if it differs.
    pub remote_usage: Option<&'static str>,
    parse: Parser,
}

impl CommandSpec {
    pub fn usage_for(&self, transport: Transport) -> &'static str {
        match (transport, self.remote_usage) {
            (Transport::Remote, Some(usage)) => usage,
            _ => self.usage,
        }
    }

    pub fn parse(&self, scope: Scope, values: &[Value]) -> CommandResult<Invocation> {
        let args = Args {
            command: self.name,
            usage: self.usage_for(scope.transport),
            values,
            scope,
        };
        (self.parse)(&args)
    }
}

const fn spec(
    name: &'static str,
    blocking: bool,
    usage: &'static str,
    remote_usage: Option<&'static str>,
    parse: Parser,
) -> CommandSpec {
    CommandSpec {
        name,
        blocking,
        usage,
        remote_usage,
        parse,
    }
}

/// The full command catalog, keyed by name.
pub fn catalog() -> BTreeMap<&'static str, CommandSpec> {
    [
        spec(
            "addServerInteractive",
            true,
            "addServerInteractive <xLocation> <yLocation>",
            Some("addServerInteractive <xLocation> <yLocation> <ip> <port>"),
            parse_add_server,
        ),
        spec(
            "addServerBundle",
            true,
            "addServerBundle <numberOfServers>",
            Some("addServerBundle <numberOfServers> <ips[]> <ports[]>"),
            parse_add_server_bundle,
        ),
        spec("removeServer", true, "removeServer <serverId>", None, |a| {
            a.arity(&[1])?;
            Ok(Invocation::RemoveServer { id: a.id(0)? })
        }),
        spec("singularQuery", false, "singularQuery <srcId> <destId>", None, |a| {
            a.arity(&[2])?;
            Ok(Invocation::SingularQuery {
                src: a.id(0)?,
                dest: a.id(1)?,
            })
        }),
        spec("singularRegion", false, "singularRegion <srcId> <destId>", None, |a| {
            a.arity(&[2])?;
            Ok(Invocation::SingularRegion {
                src: a.id(0)?,
                dest: a.id(1)?,
            })
        }),
        spec(
            "pingBlock",
            false,
            "pingBlock <xLocation> <yLocation> <srcId> <pingMSG> [number_pings] [timeout]",
            None,
            parse_ping_block,
        ),
        spec(
            "pingRegion",
            false,
            "pingRegion <xStart> <xEnd> <yStart> <yEnd> <srcId> <pingMSG> [number_pings] [timeout]",
            None,
            parse_ping_region,
        ),
        spec("exhaustiveQuery", false, "exhaustiveQuery", None, |a| {
            a.arity(&[0])?;
            Ok(Invocation::ExhaustiveQuery)
        }),
        spec("groupQuery", false, "groupQuery <srcId>", None, |a| {
            a.arity(&[1])?;
            Ok(Invocation::GroupQuery { src: a.id(0)? })
        }),
        spec("exhaustiveRegion", false, "exhaustiveRegion", None, |a| {
            a.arity(&[0])?;
            Ok(Invocation::ExhaustiveRegion)
        }),
        spec("groupRegion", false, "groupRegion <srcId>", None, |a| {
            a.arity(&[1])?;
            Ok(Invocation::GroupRegion { src: a.id(0)? })
        }),
        spec(
            "performance_1",
            true,
            "performance_1 <interval> <executionTime>",
            None,
            |a| {
                a.arity(&[2])?;
                Ok(Invocation::Performance1 {
                    interval_ms: a.whole(0)?,
                    duration_ms: a.whole(1)?,
                })
            },
        ),
        spec(
            "performance_2",
            true,
            "performance_2 <interval> <executionTime> <numberOfServers>",
            None,
            |a| {
                a.arity(&[3])?;
                Ok(Invocation::Performance2 {
                    interval_ms: a.whole(0)?,
                    duration_ms: a.whole(1)?,
                    servers: a.size(2)?,
                })
            },
        ),
        spec("performance_5", true, "performance_5", None, |a| {
            a.arity(&[0])?;
            Ok(Invocation::Performance5)
        }),
        spec("performance_6", true, "performance_6", None, |a| {
            a.arity(&[0])?;
            Ok(Invocation::Performance6)
        }),
    ]
    .into_iter()
    .map(|s| (s.name, s))
    .collect()
}

// ── Parsers ────────────────────────────────────────────────────────

fn parse_add_server(a: &Args<'_>) -> CommandResult<Invocation> {
    match a.scope.transport {
        Transport::Local => a.arity(&[2])?,
        Transport::Remote => a.arity(&[4])?,
    }
    let point = SyntheticPoint::new(a.coordinate(0)?, a.coordinate(1)?);
    let host = match a.scope.transport {
        Transport::Local => None,
        Transport::Remote => Some(Host::new(a.id(2)?, a.port(a.value(3))?)),
    };
    Ok(Invocation::AddServer { point, host })
}

fn parse_add_server_bundle(a: &Args<'_>) -> CommandResult<Invocation> {
    match a.scope.transport {
        Transport::Local => a.arity(&[1])?,
        Transport::Remote => a.arity(&[3])?,
    }
    let count = a.size(0)?;
    let hosts = match a.scope.transport {
        Transport::Local => None,
        Transport::Remote => {
            let ips = a.list(1)?;
            let ports = a.list(2)?;
            if ips.len() != count || ports.len() != count {
                return Err(a.value_error(format!(
                    "expected {count} ips and {count} ports, got {} and {}",
                    ips.len(),
                    ports.len()
                )));
            }
            let mut hosts = Vec::with_capacity(count);
            for (ip, port) in ips.iter().zip(ports) {
                let Some(ip) = ip.as_str() else {
                    return Err(a.value_error(format!("{ip} is not an ip address")));
                };
                hosts.push(Host::new(ip, a.port(port)?));
            }
            Some(hosts)
        }
    };
    Ok(Invocation::AddServerBundle { count, hosts })
}

fn parse_ping_block(a: &Args<'_>) -> CommandResult<Invocation> {
    a.arity(&[4, 6])?;
    Ok(Invocation::PingBlock {
        x: a.coordinate(0)?,
        y: a.coordinate(1)?,
        src: a.id(2)?,
        message: a.message(3)?,
        repeat: a.repeat(4)?,
    })
}

fn parse_ping_region(a: &Args<'_>) -> CommandResult<Invocation> {
    a.arity(&[6, 8])?;
    let x_start = a.coordinate(0)?;
    let x_end = a.coordinate(1)?;
    if x_end <= x_start {
        return Err(a.value_error(format!("xEnd {x_end} must be greater than xStart {x_start}")));
    }
    let y_start = a.coordinate(2)?;
    let y_end = a.coordinate(3)?;
    if y_end <= y_start {
        return Err(a.value_error(format!("yEnd {y_end} must be greater than yStart {y_start}")));
    }
    Ok(Invocation::PingRegion {
        x_start,
        x_end,
        y_start,
        y_end,
        src: a.id(4)?,
        message: a.message(5)?,
        repeat: a.repeat(6)?,
    })
}

// ── Argument access ────────────────────────────────────────────────

struct Args<'a> {
    command: &'static str,
    usage: &'static str,
    values: &'a [Value],
    scope: Scope,
}

impl Args<'_> {
    fn arity(&self, allowed: &[usize]) -> CommandResult<()> {
        if allowed.contains(&self.values.len()) {
            Ok(())
        } else {
            Err(CommandError::ArgumentMismatch {
                command: self.command.to_string(),
                usage: self.usage.to_string(),
            })
        }
    }

    fn value_error(&self, message: String) -> CommandError {
        CommandError::ArgumentValue {
            command: self.command.to_string(),
            message,
        }
    }

    fn value(&self, i: usize) -> &Value {
        self.values.get(i).unwrap_or(&Value::Null)
    }

    fn number(&self, i: usize) -> CommandResult<f64> {
        let v = self.value(i);
        v.as_f64()
            .ok_or_else(|| self.value_error(format!("{v} is not a number")))
    }

    fn coordinate(&self, i: usize) -> CommandResult<f64> {
        let v = self.number(i)?;
        let range = self.scope.range;
        if (0.0..=f64::from(range)).contains(&v) {
            Ok(v)
        } else {
            Err(self.value_error(format!("{v} is not in range 0 - {range}")))
        }
    }

    fn whole(&self, i: usize) -> CommandResult<u64> {
        let v = self.value(i);
        v.as_u64()
            .ok_or_else(|| self.value_error(format!("{v} is not a non-negative integer")))
    }

    fn size(&self, i: usize) -> CommandResult<usize> {
        let n = self.whole(i)?;
        usize::try_from(n).map_err(|_| self.value_error(format!("{n} is too large")))
    }

    fn port(&self, v: &Value) -> CommandResult<u16> {
        v.as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| self.value_error(format!("{v} is not a port")))
    }

    fn id(&self, i: usize) -> CommandResult<String> {
        let v = self.value(i);
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| self.value_error(format!("{v} is not a string")))
    }

    fn list(&self, i: usize) -> CommandResult<&Vec<Value>> {
        let v = self.value(i);
        v.as_array()
            .ok_or_else(|| self.value_error(format!("{v} is not a list")))
    }

    /// Ping messages are written as one word on the node's input line.
    fn message(&self, i: usize) -> CommandResult<String> {
        let text = match self.value(i) {
            Value::String(s) => s.clone(),
            Value::Null => return Err(self.value_error("missing ping message".into())),
            other => other.to_string(),
        };
        if text.is_empty() || text.contains(char::is_whitespace) {
            return Err(self.value_error(format!("{text:?} is not a single word")));
        }
        Ok(text)
    }

    /// Optional trailing `[number_pings] [timeout]` pair starting at `i`.
    /// A zero in either position sends the untimed form.
    fn repeat(&self, i: usize) -> CommandResult<Option<PingRepeat>> {
        if self.values.len() <= i {
            return Ok(None);
        }
        let count = self.whole(i)?;
        let timeout_ms = self.whole(i + 1)?;
        if count == 0 || timeout_ms == 0 {
            return Ok(None);
        }
        Ok(Some(PingRepeat { count, timeout_ms }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LOCAL: Scope = Scope {
        range: 100,
        transport: Transport::Local,
    };
    const REMOTE: Scope = Scope {
        range: 100,
        transport: Transport::Remote,
    };

    fn parse(scope: Scope, name: &str, args: Value) -> CommandResult<Invocation> {
        let catalog = catalog();
        let values = args.as_array().cloned().unwrap_or_default();
        catalog[name].parse(scope, &values)
    }

    #[test]
    fn catalog_is_closed() {
        let names: Vec<_> = catalog().keys().copied().collect();
        assert_eq!(names.len(), 15);
        assert!(names.contains(&"exhaustiveRegion"));
        assert!(!names.contains(&"query"));
    }

    #[test]
    fn add_server_arity_depends_on_transport() {
        assert!(parse(LOCAL, "addServerInteractive", json!([10, 20])).is_ok());
        assert!(matches!(
            parse(LOCAL, "addServerInteractive", json!([10, 20, "10.0.0.1", 1883])),
            Err(CommandError::ArgumentMismatch { .. })
        ));
        assert_eq!(
            parse(REMOTE, "addServerInteractive", json!([10, 20, "10.0.0.1", 1883])).unwrap(),
            Invocation::AddServer {
                point: SyntheticPoint::new(10.0, 20.0),
                host: Some(Host::new("10.0.0.1", 1883)),
            }
        );
        match parse(REMOTE, "addServerInteractive", json!([10, 20])) {
            Err(CommandError::ArgumentMismatch { usage, .. }) => assert!(usage.contains("<ip>")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn coordinates_must_be_in_range() {
        assert!(matches!(
            parse(LOCAL, "addServerInteractive", json!([101, 20])),
            Err(CommandError::ArgumentValue { .. })
        ));
        assert!(matches!(
            parse(LOCAL, "addServerInteractive", json!(["10", 20])),
            Err(CommandError::ArgumentValue { .. })
        ));
        assert!(parse(LOCAL, "addServerInteractive", json!([0, 100])).is_ok());
    }

    #[test]
    fn remote_bundle_needs_matching_lists() {
        let ok = parse(
            REMOTE,
            "addServerBundle",
            json!([2, ["10.0.0.1", "10.0.0.2"], [1883, 1884]]),
        )
        .unwrap();
        assert_eq!(
            ok,
            Invocation::AddServerBundle {
                count: 2,
                hosts: Some(vec![Host::new("10.0.0.1", 1883), Host::new("10.0.0.2", 1884)]),
            }
        );
        assert!(parse(REMOTE, "addServerBundle", json!([2, ["10.0.0.1"], [1883]])).is_err());
        assert_eq!(
            parse(LOCAL, "addServerBundle", json!([3])).unwrap(),
            Invocation::AddServerBundle {
                count: 3,
                hosts: None
            }
        );
    }

    #[test]
    fn ping_block_with_and_without_repeat() {
        assert_eq!(
            parse(LOCAL, "pingBlock", json!([5, 6, "SBS_1_1", "hi"])).unwrap(),
            Invocation::PingBlock {
                src: "SBS_1_1".into(),
                x: 5.0,
                y: 6.0,
                message: "hi".into(),
                repeat: None,
            }
        );
        match parse(LOCAL, "pingBlock", json!([5, 6, "SBS_1_1", 42, 3, 200])).unwrap() {
            Invocation::PingBlock {
                message, repeat, ..
            } => {
                assert_eq!(message, "42");
                assert_eq!(
                    repeat,
                    Some(PingRepeat {
                        count: 3,
                        timeout_ms: 200
                    })
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse(LOCAL, "pingBlock", json!([5, 6, "SBS_1_1", "hi", 3])),
            Err(CommandError::ArgumentMismatch { .. })
        ));
    }

    #[test]
    fn zero_repeat_sends_the_untimed_form() {
        for args in [
            json!([1, 1, "SBS_0_0", "m", 0, 200]),
            json!([1, 1, "SBS_0_0", "m", 3, 0]),
        ] {
            match parse(LOCAL, "pingBlock", args).unwrap() {
                Invocation::PingBlock { repeat, .. } => assert_eq!(repeat, None),
                other => panic!("unexpected {other:?}"),
            }
        }
        match parse(LOCAL, "pingRegion", json!([0, 20, 5, 15, "SBS_1_1", "m", 0, 0])).unwrap() {
            Invocation::PingRegion { repeat, .. } => assert_eq!(repeat, None),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse(LOCAL, "pingBlock", json!([1, 1, "SBS_0_0", "m", -1, 200])),
            Err(CommandError::ArgumentValue { .. })
        ));
    }

    #[test]
    fn referenced_ids_cover_sources_and_targets() {
        let query = parse(LOCAL, "singularQuery", json!(["SBS_1_1", "SB_Root_5_5"])).unwrap();
        assert_eq!(query.referenced_ids(), vec!["SBS_1_1", "SB_Root_5_5"]);
        let ping = parse(LOCAL, "pingBlock", json!([5, 6, "SBS_1_1", "hi"])).unwrap();
        assert_eq!(ping.referenced_ids(), vec!["SBS_1_1"]);
        assert!(Invocation::ExhaustiveQuery.referenced_ids().is_empty());
    }

    #[test]
    fn ping_region_needs_ordered_bounds() {
        assert!(parse(LOCAL, "pingRegion", json!([0, 20, 5, 15, "SBS_1_1", "m"])).is_ok());
        assert!(parse(LOCAL, "pingRegion", json!([0, 20, 5, 15, "SBS_1_1", "m", 2, 100])).is_ok());
        assert!(matches!(
            parse(LOCAL, "pingRegion", json!([20, 20, 5, 15, "SBS_1_1", "m"])),
            Err(CommandError::ArgumentValue { .. })
        ));
        assert!(matches!(
            parse(LOCAL, "pingRegion", json!([0, 20, 15, 5, "SBS_1_1", "m"])),
            Err(CommandError::ArgumentValue { .. })
        ));
    }

    #[test]
    fn ids_must_be_strings() {
        assert!(matches!(
            parse(LOCAL, "removeServer", json!([7])),
            Err(CommandError::ArgumentValue { .. })
        ));
        assert!(matches!(
            parse(LOCAL, "singularQuery", json!(["SBS_1_1"])),
            Err(CommandError::ArgumentMismatch { .. })
        ));
    }

    #[test]
    fn benchmark_arguments() {
        assert_eq!(
            parse(LOCAL, "performance_2", json!([10, 1000, 3])).unwrap(),
            Invocation::Performance2 {
                interval_ms: 10,
                duration_ms: 1000,
                servers: 3
            }
        );
        assert!(parse(LOCAL, "performance_1", json!([-1, 1000])).is_err());
        assert!(parse(LOCAL, "performance_6", json!([1])).is_err());
    }
}
