use std::error::Error;
use std::io::{self, BufRead, Write};

use clap::Parser;
use serde_derive::{Deserialize, Serialize};

use shkv::{KvClient, ShmemConfig};

#[derive(Parser)]
#[clap(about = "interactive client for the shared-memory key-value store")]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shkv-client.toml")]
    config: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ClientConfig {
    shmem: ShmemConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opts: Opts = Opts::parse();
    let cfg: ClientConfig = confy::load_path(&opts.config)?;

    let client = match KvClient::connect(&cfg.shmem) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "cannot attach to {}: {} (did you start the server?)",
                cfg.shmem.flink_path(),
                e
            );
            std::process::exit(1);
        }
    };
    println!("connected as client #{}", client.client_id());
    repl(&client)
}

fn repl(client: &KvClient) -> Result<(), Box<dyn Error>> {
    let stdin = io::stdin();
    println!("commands: insert <key> <value> [async] | remove <key> [async] | read <key> | quit");
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["quit"] | ["exit"] => return Ok(()),
            ["insert", key, value] => client.insert(key, value, false)?,
            ["insert", key, value, "async"] => client.insert(key, value, true)?,
            ["remove", key] => client.remove(key, false)?,
            ["remove", key, "async"] => client.remove(key, true)?,
            ["read", key] => match client.read(key)? {
                Some(value) => println!("{}", value),
                None => println!("key not present"),
            },
            _ => println!("command not recognized, please try again"),
        }
    }
}
