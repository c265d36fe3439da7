use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;

use chomp_judge::pipes;
use chomp_judge::types::{GameUpdate, MatchConfig};
use chomp_judge::MatchSession;

/// Headless judge: creates the pipes, waits for a solution to attach,
/// referees the match and prints the result.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let config = parse_args()?;
    let prefix = pipes::pipe_name_prefix();
    let input = format!("{}{}", prefix, config.solution_input_pipe());
    let output = format!("{}{}", prefix, config.solution_output_pipe());
    println!("waiting for a solution to attach");
    println!("  the solution must read from: {input}");
    println!("  the solution must write to:  {output}");
    println!("  or, from a console: solution_cmd <{input} >{output}");

    let (updates_tx, mut updates_rx) = mpsc::channel::<GameUpdate>(100);
    tokio::spawn(async move { while updates_rx.recv().await.is_some() {} });

    let mut session = MatchSession::start(config, updates_tx);
    session.join().await;

    if let Some(message) = session.error() {
        bail!("match failed: {message}");
    }
    let report = session.report().context("match produced no report")?;
    let tally = session.tally();
    println!("games played: {}", tally.played);
    println!("games won:    {}", tally.won);
    if tally.played > 0 {
        println!(
            "average bits per game: {:.2}",
            report.secret_length as f64 / tally.played as f64
        );
        if let Some(score) = session.score() {
            println!("score: {:.3}", score);
        }
    }
    if let Some(secret) = session.secret() {
        println!("secret: {secret}");
    }
    println!("--- transcript ---");
    println!("{}", report.encode());
    Ok(())
}

fn parse_args() -> Result<MatchConfig> {
    let mut config = MatchConfig::default();
    let mut args = std::env::args().skip(1);
    if let Some(v) = args.next() {
        config.field_size = v
            .parse()
            .context("usage: chomp-judge [field_size] [max_eaten] [secret_length]")?;
    }
    if let Some(v) = args.next() {
        config.max_eaten = v.parse().context("max_eaten must be an integer")?;
    }
    if let Some(v) = args.next() {
        config.secret_length = v.parse().context("secret_length must be an integer")?;
    }
    if config.field_size == 0 {
        bail!("field size must be at least 1");
    }
    Ok(config)
}
