use std::io::{self, Write};

use bandstore::client::Session;
use bandstore::config::ClientConfig;
use bandstore::repl::{Flow, Repl};
use bandstore::Error;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = ClientConfig::parse();
    bandstore::init_tracing("warn");

    let session = Session::connect(config.address(), config.timeout()).await?;
    let mut repl = Repl::new(session);
    let mut stdout = io::stdout();

    if let Some(script) = &config.script {
        repl.run_script(script, &mut stdout).await?;
        return Ok(());
    }

    println!(
        "Connected to {}. Type `help` for the list of commands.",
        config.address()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        stdout.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if repl.handle_line(&line, &mut stdout).await? == Flow::Exit {
            break;
        }
    }

    Ok(())
}
