use anyhow::Result;
use colored::Colorize;
use dialoguer::Input;

use dialogpress_engine::{ComparisonResult, Engine, SendOutcome, SessionHandle, StatsReport, TestReport};

#[derive(Debug, PartialEq)]
enum ChatCommand {
    Send(String),
    Compare(String),
    Stats,
    History,
    Clear,
    Test,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

fn parse_command(line: &str) -> ChatCommand {
    let line = line.trim();
    if line.is_empty() {
        return ChatCommand::Empty;
    }
    if !line.starts_with('/') {
        return ChatCommand::Send(line.to_string());
    }
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };
    match cmd {
        "/compare" => ChatCommand::Compare(rest.to_string()),
        "/stats" => ChatCommand::Stats,
        "/history" => ChatCommand::History,
        "/clear" => ChatCommand::Clear,
        "/test" => ChatCommand::Test,
        "/help" => ChatCommand::Help,
        "/quit" | "/exit" => ChatCommand::Quit,
        other => ChatCommand::Unknown(other.to_string()),
    }
}

fn print_help() {
    println!("  {}  compare compressed vs full history", "/compare <msg>".bright_white());
    println!("  {}          show compression counters", "/stats".bright_white());
    println!("  {}        show the live history", "/history".bright_white());
    println!("  {}          start over", "/clear".bright_white());
    println!("  {}           run the scripted self-test", "/test".bright_white());
    println!("  {}           leave", "/quit".bright_white());
}

fn banner(title: &str) {
    println!("{}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".bright_blue());
    println!("  {}", title.green().bold());
    println!("{}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".bright_blue());
}

fn print_outcome(outcome: &SendOutcome) {
    println!("{} {}", "assistant:".cyan().bold(), outcome.response);
    let m = &outcome.metrics;
    println!(
        "  {}",
        format!(
            "{}s · {} in + {} out = {} tokens · {}₽",
            m.response_time, m.input_tokens, m.output_tokens, m.total_tokens, m.cost_rub
        )
        .dimmed()
    );
    if outcome.compression_triggered {
        println!(
            "  {} {} compressions, {} tokens saved",
            "compressed:".yellow(),
            outcome.compression_stats.compression_count,
            outcome.compression_stats.total_tokens_saved
        );
    }
    if let Some(err) = &outcome.compression_error {
        println!("  {} {}", "compression skipped:".yellow(), err);
    }
}

pub fn print_stats(stats: &StatsReport) {
    let m = &stats.metrics;
    println!("  Session:             {}", stats.session_id.dimmed());
    println!("  Phase:               {:?}", stats.phase);
    println!("  Turns in history:    {}", stats.history_length);
    println!("  Messages:            {}", m.total_messages);
    println!("  Compressed messages: {}", m.compressed_messages);
    println!("  Compressions:        {}", m.compression_count);
    println!("  Full tokens:         {}", m.current_full_tokens);
    println!("  Compressed tokens:   {}", m.current_compressed_tokens);
    println!("  Ratio:               {:.2}", m.compression_ratio);
    println!("  Tokens saved:        {}", m.total_tokens_saved.to_string().green());
}

pub fn print_comparison(cmp: &ComparisonResult) {
    for (label, result) in [
        ("with compression", Some(&cmp.with_compression)),
        ("without compression", cmp.without_compression.as_ref()),
    ] {
        println!("  {}", label.bright_white().bold());
        let Some(result) = result else {
            let err = cmp.without_compression_error.as_deref().unwrap_or("no result");
            println!("    {} {}", "failed:".red(), err);
            continue;
        };
        let m = &result.metrics;
        println!(
            "    {} turns · {} in + {} out = {} tokens · {}₽ · {}s",
            m.history_messages, m.input_tokens, m.output_tokens, m.total_tokens, m.cost_rub, m.response_time
        );
    }
    if let Some(s) = &cmp.savings {
        println!(
            "  {} {} prompt tokens ({}%), {}₽ ({}%), {}s",
            "saved:".green().bold(),
            s.tokens_saved,
            s.tokens_saved_percent,
            s.cost_saved,
            s.cost_saved_percent,
            s.time_difference
        );
    }
}

pub fn print_report(report: &TestReport) {
    banner("Self-test");
    for record in &report.per_message {
        match &record.metrics {
            Some(m) => println!(
                "  [{:>2}] {} {}",
                record.index,
                record.message,
                format!("({} tokens, {}s)", m.total_tokens, m.response_time).dimmed()
            ),
            None => println!(
                "  [{:>2}] {} {} {}",
                record.index,
                record.message,
                "failed:".red(),
                record.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    println!();
    println!(
        "  Sent {} messages in {}s, {} tokens, {}₽",
        report.messages_sent, report.total_time, report.total_tokens, report.total_cost
    );
    println!();
    print_stats(&report.final_stats);
    println!();
    match (&report.comparison, &report.comparison_error) {
        (Some(cmp), _) => print_comparison(cmp),
        (None, Some(err)) => println!("  {} {}", "comparison failed:".red(), err),
        (None, None) => {}
    }
}

/// Interactive loop. Each request runs to completion on `rt`.
pub fn run_chat(engine: &Engine, rt: &tokio::runtime::Runtime) -> Result<()> {
    let session = SessionHandle::new();
    banner("dialogpress chat");
    println!(
        "  Model: {}  Threshold: {}  Retain: {}",
        engine.settings().chat.model.bright_white(),
        engine.settings().compression.threshold,
        engine.settings().compression.retain
    );
    println!("  Type {} for commands.", "/help".green());
    println!();

    loop {
        let line: String = Input::new()
            .with_prompt("you")
            .allow_empty(true)
            .interact_text()?;

        match parse_command(&line) {
            ChatCommand::Empty => continue,
            ChatCommand::Quit => break,
            ChatCommand::Help => print_help(),
            ChatCommand::Send(message) => match rt.block_on(engine.send(&session, &message)) {
                Ok(outcome) => print_outcome(&outcome),
                Err(e) => println!("{} {}", "Error:".red(), e),
            },
            ChatCommand::Compare(message) => {
                match rt.block_on(engine.compare(&session, &message)) {
                    Ok(cmp) => print_comparison(&cmp),
                    Err(e) => println!("{} {}", "Error:".red(), e),
                }
            }
            ChatCommand::Stats => print_stats(&rt.block_on(engine.stats(&session))),
            ChatCommand::History => {
                for turn in rt.block_on(engine.history(&session)) {
                    println!(
                        "  {} {}",
                        format!("[{}]", turn.role.as_str()).dimmed(),
                        turn.text
                    );
                }
            }
            ChatCommand::Clear => {
                rt.block_on(engine.clear(&session));
                println!("{}", "History cleared.".green());
            }
            ChatCommand::Test => print_report(&rt.block_on(engine.run_test(&session))),
            ChatCommand::Unknown(cmd) => {
                println!("{} unknown command {}", "Error:".red(), cmd);
                print_help();
            }
        }
        println!();
    }

    Ok(())
}
