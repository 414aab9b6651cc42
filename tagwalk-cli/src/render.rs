//! Terminal and JSON output for finished commands

use colored::Colorize;
use serde::Serialize;
use tagwalk_core::{Command, CommandStatus, DbConfig, GroupedParser};

pub fn print_json(value: &impl Serialize) -> tagwalk_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Explain a non-`Ok` status. Returns true if the command succeeded.
pub fn report_status(cmd: &Command, json: bool) -> tagwalk_core::Result<bool> {
    let status = cmd.status();
    if status == CommandStatus::Ok {
        return Ok(true);
    }
    if json {
        let value = serde_json::json!({
            "status": status,
            "operation": cmd.operation(),
            "tag": cmd.tag(),
            "output": cmd.output_text(),
        });
        print_json(&value)?;
        return Ok(false);
    }

    let message = match status {
        CommandStatus::Cancelled => format!("{} cancelled", cmd.name()),
        CommandStatus::RunError => format!(
            "{} could not start the GTags tools (check [tools] dir in settings)",
            cmd.name()
        ),
        CommandStatus::Failed => format!("{} failed:\n{}", cmd.name(), cmd.output_text().trim_end()),
        CommandStatus::ParseError => format!(
            "unexpected output from {}; the database may be out of date, try 'tagwalk create'",
            cmd.name()
        ),
        CommandStatus::ParseEmpty => format!("\"{}\": every result is under a filtered path", cmd.tag()),
        CommandStatus::Pending | CommandStatus::Running | CommandStatus::Ok => return Ok(true),
    };
    eprintln!("{}: {}", "Error".red(), message);
    Ok(false)
}

pub fn grouped(cmd: &Command, parser: &GroupedParser, json: bool) -> tagwalk_core::Result<()> {
    if json {
        let value = serde_json::json!({
            "status": cmd.status(),
            "result": parser.result(),
        });
        return print_json(&value);
    }

    if parser.hit_count() == 0 {
        println!("\"{}\" not found", cmd.tag());
        return Ok(());
    }

    println!("{}", parser.result().header.bold());
    for group in parser.files() {
        println!("  {}", group.file.cyan());
        for hit in &group.hits {
            println!("    {}: {}", hit.line.to_string().yellow(), hit.text);
        }
    }
    println!(
        "{} {} in {} {}",
        parser.hit_count(),
        if parser.hit_count() == 1 { "hit" } else { "hits" },
        parser.file_count(),
        if parser.file_count() == 1 { "file" } else { "files" },
    );
    Ok(())
}

pub fn list(entries: &[String], json: bool) -> tagwalk_core::Result<()> {
    if json {
        return print_json(&entries);
    }
    for entry in entries {
        println!("{entry}");
    }
    Ok(())
}

pub fn db_config(config: &DbConfig, json: bool) -> tagwalk_core::Result<()> {
    if json {
        return print_json(config);
    }
    print!("{config}");
    Ok(())
}
