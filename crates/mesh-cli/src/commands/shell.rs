//! Interactive command shell.
//!
//! One command per line: a name followed by whitespace-separated
//! arguments. Arguments that parse as JSON are taken as such (numbers,
//! quoted strings, `["a","b"]` lists); anything else is a plain string.

use std::io::Write;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use mesh_core::Command;
use meshgrid_commands::CommandRegistry;

pub fn parse_line(line: &str) -> Option<Command> {
    let mut tokens = line.split_whitespace();
    let name = tokens.next()?;
    let args = tokens
        .map(|t| serde_json::from_str(t).unwrap_or_else(|_| Value::String(t.to_string())))
        .collect();
    Some(Command::new(name, args))
}

fn print_help(registry: &CommandRegistry) {
    let transport = registry.manager().transport();
    println!("Commands:");
    for spec in registry.catalog() {
        let marker = if spec.blocking { "*" } else { " " };
        println!("  {marker} {}", spec.usage_for(transport));
    }
    println!("  * blocking");
    println!("    nodes | help | quit");
}

fn print_nodes(registry: &CommandRegistry) {
    let manager = registry.manager();
    for id in manager.ids() {
        if let Some(entry) = manager.entry(&id) {
            println!(
                "  {id:<18} {:<7} {:<22} ({}, {})  {:?}",
                entry.role,
                entry.host.to_string(),
                entry.point.x,
                entry.point.y,
                entry.state
            );
        }
    }
}

fn prompt() {
    print!("meshctl> ");
    let _ = std::io::stdout().flush();
}

/// Read commands from stdin until `quit`, end of input, or Ctrl-C.
pub async fn interactive(registry: &mut CommandRegistry) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_help(registry);
    loop {
        prompt();
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let Some(command) = parse_line(&line) else {
            continue;
        };
        match command.cmd.as_str() {
            "quit" | "exit" => break,
            "help" => print_help(registry),
            "nodes" => print_nodes(registry),
            _ => match registry.run(&command).await {
                Ok(()) => println!("✓ {}", command.cmd),
                Err(e) => eprintln!("{e}"),
            },
        }
    }
    Ok(())
}
