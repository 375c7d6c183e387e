use clap::{ArgAction, Parser};
use rmake::{parse_makefile, Context, Error, Options, Source, ToSyntax, EXIT_ERROR, EXIT_SUCCESS};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "rmake",
    version,
    about = "GNU Make compatible build tool",
    disable_version_flag = true
)]
struct Args {
    /// Read FILE as the makefile.
    #[arg(short = 'f', long = "file", visible_alias = "makefile", value_name = "FILE")]
    file: Option<PathBuf>,

    /// Change to DIRECTORY before doing anything; repeat to descend further.
    #[arg(short = 'C', long = "directory", value_name = "DIRECTORY", action = ArgAction::Append)]
    directory: Vec<PathBuf>,

    /// Accepted for compatibility; there are no built-in rules.
    #[arg(short = 'r', long = "no-builtin-rules")]
    no_builtin_rules: bool,

    /// Print the syntax tree of the makefile and exit.
    #[arg(short = 'S')]
    syntax: bool,

    /// Write the parsed makefile back out to FILE and exit.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Print the recipes that would run without running them.
    #[arg(short = 'n', long = "dry-run", visible_aliases = ["just-print", "recon"])]
    dry_run: bool,

    /// Unconditionally make all targets.
    #[arg(short = 'B', long = "always-make")]
    always_make: bool,

    /// Don't echo recipes.
    #[arg(short = 's', long = "silent", visible_alias = "quiet")]
    silent: bool,

    /// Run no recipes; the exit status says whether anything is out of date.
    #[arg(short = 'q', long = "question")]
    question: bool,

    /// Print debugging information.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Warn when an undefined variable is referenced.
    #[arg(long = "warn-undefined-variables")]
    warn_undefined_variables: bool,

    /// Print version information.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,

    /// Targets to make and NAME=VALUE assignments.
    #[arg(value_name = "TARGET")]
    targets: Vec<String>,
}

impl Args {
    fn options(&self) -> Options {
        Options {
            dry_run: self.dry_run,
            always_make: self.always_make,
            silent: self.silent,
            question: self.question,
            warn_undefined: self.warn_undefined_variables,
        }
    }
}

fn run(args: &Args) -> Result<i32, Error> {
    for dir in &args.directory {
        log::debug!("entering directory {}", dir.display());
        std::env::set_current_dir(dir)?;
    }

    let src = match &args.file {
        Some(path) => Source::from_file(path)?,
        None => Source::find_default()?,
    };

    if args.syntax || args.output.is_some() {
        let makefile = parse_makefile(&src)?;
        if args.syntax {
            println!("{:#?}", makefile.syntax());
        }
        if let Some(output) = &args.output {
            std::fs::write(output, makefile.makefile())?;
        }
        return Ok(EXIT_SUCCESS);
    }

    let mut ctx = Context::new(args.options());
    let mut goals = Vec::new();
    for arg in &args.targets {
        if !ctx.add_command_line(arg)? {
            goals.push(arg.clone());
        }
    }
    ctx.execute(&src, &goals)
}

fn main() {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if args.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    if args.no_builtin_rules {
        log::debug!("-r given; there are no built-in rules to disable");
    }

    let status = match run(&args) {
        Ok(status) => status,
        Err(Error::Io(e)) => {
            eprintln!("rmake: {}", e);
            EXIT_ERROR
        }
        Err(e) => {
            eprintln!("{}", e);
            e.exit_status()
        }
    };
    std::process::exit(status);
}
