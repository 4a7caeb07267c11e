use anyhow::Context;
use uuid::Uuid;

pub(crate) struct Args {
    pub config_path: Option<String>,
    pub url: Option<String>,
    pub room: Option<String>,
    pub user_id: String,
}

pub(crate) fn parse_args() -> anyhow::Result<Args> {
    let mut config_path = None;
    let mut url = None;
    let mut room = None;
    let mut user_id: Option<String> = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-V" | "--version" => {
                println!("huddle {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-h" | "--help" => {
                println!("huddle - two-party WebRTC call client");
                println!();
                println!("USAGE:");
                println!("    huddle [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    --config <PATH>              TOML configuration file");
                println!(
                    "    --url <URL>                  Signaling server WebSocket URL [default: ws://127.0.0.1:9090/ws]"
                );
                println!("    --room <NAME>                Room to join [default: lobby]");
                println!("    --user-id <ID>               Local user identifier [default: random UUID]");
                println!("    -V, --version                Print version and exit");
                println!("    -h, --help                   Print this help and exit");
                std::process::exit(0);
            }
            "--config" => {
                i += 1;
                config_path = Some(args.get(i).context("Missing --config value")?.clone());
            }
            "--url" => {
                i += 1;
                url = Some(args.get(i).context("Missing --url value")?.clone());
            }
            "--room" => {
                i += 1;
                room = Some(args.get(i).context("Missing --room value")?.clone());
            }
            "--user-id" => {
                i += 1;
                user_id = Some(args.get(i).context("Missing --user-id value")?.clone());
            }
            other => anyhow::bail!("Unknown argument: {other}"),
        }
        i += 1;
    }

    Ok(Args {
        config_path,
        url,
        room,
        user_id: user_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
    })
}
