use std::io::{self, BufRead, Write};

use forum_tui::jump::PostRoute;
use forum_tui::RunOptions;

const HELP: &str = "forum-tui — Browse and discuss on a forum from the terminal.

  --version, -V          Show version and exit
  --help,    -h          Show this help message
  --offline              Browse built-in sample data
  --open <route>         Start on a thread page, e.g. /posts/42?page=3
  --api <url>            Save the forum API endpoint to the config file and exit
  --login <username>     Sign in (password is read from stdin) and exit
  --logout               Forget the stored session and exit";

fn main() {
    let options = match handle_cli_flags() {
        Ok(Some(options)) => options,
        Ok(None) => return,
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(1);
        }
    };

    if let Err(err) = forum_tui::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// Returns the run options, or `None` when a flag already did its work.
fn handle_cli_flags() -> anyhow::Result<Option<RunOptions>> {
    let mut options = RunOptions::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("forum-tui {}", forum_tui::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(None);
            }
            "--offline" => options.offline = true,
            "--open" => {
                let route = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--open needs a route such as /posts/42"))?;
                options.open = Some(PostRoute::parse(&route)?);
            }
            "--api" => {
                let url = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--api needs a URL"))?;
                let path = forum_tui::config::save_api_endpoint(None, &url)?;
                println!("Saved api.base_url to {}", path.display());
                return Ok(None);
            }
            "--login" => {
                let username = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--login needs a username"))?;
                let password = read_password()?;
                let name = forum_tui::login(&username, &password)?;
                println!("Signed in as {name}.");
                return Ok(None);
            }
            "--logout" => {
                if forum_tui::logout()? {
                    println!("Signed out.");
                } else {
                    println!("No stored session.");
                }
                return Ok(None);
            }
            other => anyhow::bail!("unknown argument {other:?}, see --help"),
        }
    }
    Ok(Some(options))
}

fn read_password() -> anyhow::Result<String> {
    print!("Password: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
