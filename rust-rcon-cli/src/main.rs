use ansi_term::Colour::{Fixed, Green, Yellow};
use clap::Parser;
use log::{error, info, LevelFilter};
use regex::Regex;
use rpassword::read_password;
use rust_rcon_client::{connect, Error, RconClient};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::fmt::{Display, Formatter};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// IP, hostname or FQDN of the Rust server.
    host: String,

    /// RCON port, usually the game port + 1.
    #[clap(default_value_t = 28016)]
    port: u16,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ! {
    TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .unwrap();

    let args = Args::parse();

    print!("{}:{}'s password: ", args.host, args.port);
    std::io::stdout().flush().unwrap();
    let password = read_password().unwrap();

    let client = match connect(&args.host, args.port, &password).await {
        Ok(client) => client,
        Err(err @ Error::Argument(_)) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
        Err(err) => {
            error!("Connection failed: {}", err);
            std::process::exit(1);
        }
    };
    let client = Arc::new(client);

    info!(
        "Connected. View builtins with `!help`. {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let prompt = Prompt {
        host: args.host.clone(),
        port: args.port,
    };

    // Start relaying passive server traffic (chat, joins, quits)
    tokio::spawn(passive_loop(Arc::clone(&client), prompt.clone()));

    // Start receiving REPL inputs
    repl_loop(client, prompt).await
}

#[derive(Clone)]
struct Prompt {
    host: String,
    port: u16,
}

impl Display for Prompt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}> ",
            Fixed(10).paint(format!("{}:{}", self.host, self.port))
        )
    }
}

async fn passive_loop(client: Arc<RconClient>, prompt: Prompt) -> ! {
    let chat = Regex::new(r#"^\[CHAT\] ".*":".*"$"#).unwrap();
    let connected = Regex::new(r"^User Connected: .* \(\d+\)$").unwrap();
    let disconnected = Regex::new(r"^User Disconnected: .*$").unwrap();

    loop {
        let message = match client.read_passive() {
            Ok(Some(message)) => message,
            Ok(None) => {
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
            Err(err) => {
                eprint!("\r");
                error!("Connection closed: {}", err);
                std::process::exit(1);
            }
        };

        print!("\r");
        if chat.is_match(&message.response) {
            info!("{} {}", Yellow.paint("[chat]"), message.response);
        } else if connected.is_match(&message.response) || disconnected.is_match(&message.response)
        {
            info!("{} {}", Green.paint("[join]"), message.response);
        } else {
            info!("{}", message.response);
        }
        print!("{}", prompt);
        std::io::stdout().flush().unwrap();
    }
}

async fn repl_loop(client: Arc<RconClient>, prompt: Prompt) -> ! {
    let mut input_lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{}", prompt);
        std::io::stdout().flush().unwrap();

        let line = match input_lines.next_line().await.unwrap() {
            Some(line) => line,
            None => continue,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(builtin) = line.strip_prefix('!') {
            if builtin == "help" {
                println!(
                    "{} {}",
                    Green.paint(env!("CARGO_PKG_NAME")),
                    env!("CARGO_PKG_VERSION")
                );
                println!();
                println!("{}", Yellow.paint("BUILTINS"));
                println!("    !help                View this help listing");
                println!(
                    "    {}  Run a command on the server",
                    Green.paint("<COMMAND> [ARGS...]")
                );
            } else {
                eprintln!("Unknown builtin.");
            }
            continue;
        }

        match client.send(line).await {
            Ok(id) => {
                let prompt = prompt.clone();
                client.register_callback(id, move |req| {
                    print!("\r");
                    info!("{}", req.response);
                    print!("{}", prompt);
                    std::io::stdout().flush().unwrap();
                });
            }
            Err(err) => {
                error!("An error occurred: {}", err);
                std::process::exit(1);
            }
        }
    }
}
