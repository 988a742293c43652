use phrack_tui::session::{sanitize_issue_id, DEFAULT_ISSUE};

const HELP: &str = "Phrack-TUI - Download and read Phrack issues from the terminal.

Usage: phrack-tui [ISSUE]

  ISSUE                Issue number to open (default: 1)
  --version, -V        Show version and exit
  --help,    -h        Show this help message

Keys: Tab switch pane, Up/Down move, Enter open page or \"load\", Ctrl-C quit";

enum Cli {
    Exit,
    Run(String),
}

fn main() {
    let issue = match parse_args(std::env::args().skip(1)) {
        Ok(Cli::Exit) => return,
        Ok(Cli::Run(issue)) => issue,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(2);
        }
    };

    if let Err(err) = phrack_tui::run(issue) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Cli, String> {
    let mut issue: Option<String> = None;
    for arg in args {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Phrack-TUI {}", phrack_tui::VERSION);
                return Ok(Cli::Exit);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(Cli::Exit);
            }
            _ if issue.is_none() => {
                let sanitized = sanitize_issue_id(&arg)
                    .ok_or_else(|| format!("issue number {arg:?} contains no digits"))?;
                issue = Some(sanitized);
            }
            _ => {}
        }
    }
    Ok(Cli::Run(issue.unwrap_or_else(|| DEFAULT_ISSUE.to_string())))
}
