use std::path::PathBuf;
use std::process;

fn main() {
    let opts = match parse_args() {
        Ok(Parsed::Run(opts)) => opts,
        Ok(Parsed::Exit) => return,
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!("Run with --help for usage");
            process::exit(2);
        }
    };

    if let Err(err) = patreon_tui::run(opts) {
        eprintln!("error: {err:?}");
        process::exit(1);
    }
}

enum Parsed {
    Run(patreon_tui::app::RunOptions),
    Exit,
}

fn parse_args() -> Result<Parsed, String> {
    let mut opts = patreon_tui::app::RunOptions::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("patreon-tui {}", patreon_tui::VERSION);
                return Ok(Parsed::Exit);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(Parsed::Exit);
            }
            "--extract-links" => opts.extract_links = true,
            "--cookies" => opts.cookies = Some(value_for(&arg, &mut args)?),
            "--config" => opts.config_file = Some(PathBuf::from(value_for(&arg, &mut args)?)),
            "--db" => opts.db_path = Some(PathBuf::from(value_for(&arg, &mut args)?)),
            "--after" => opts.published_after = Some(value_for(&arg, &mut args)?),
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(Parsed::Run(opts))
}

fn value_for(flag: &str, args: &mut impl Iterator<Item = String>) -> Result<String, String> {
    args.next().ok_or_else(|| format!("{flag} requires a value"))
}

fn print_help() {
    println!(
        "patreon-tui - Browse Patreon campaign posts from the terminal.\n\n\
         Usage: patreon-tui [OPTIONS]\n\n\
         Options:\n  \
         --cookies <VALUE>    Patreon session cookies (overrides config)\n  \
         --config <PATH>      Config file path (default: OS config dir)\n  \
         --db <PATH>          Cache database path (default: OS config dir)\n  \
         --after <DATE>       Only extract posts published after DATE (YYYY-MM-DD)\n  \
         --extract-links      Extract YouTube links from all configured campaigns and exit\n  \
         --version, -V        Show version and exit\n  \
         --help,    -h        Show this help message"
    );
}
