use std::{error::Error, fs, path::Path, process};

use clap::{Arg, ArgMatches, Command};
use tracing::{info, warn, Level};

use turner::{
    backend::{compiler::Compiler, reduction::Outcome, value::Value, wire::Image},
    compile_image,
    frontend::parse_module,
    run_image,
    visualize::Visualizer,
    Config,
};

fn main() {
    let matches = Command::new("turner")
        .version("0.1.0")
        .about("Compiles desugared lazy functional programs to combinators and runs them.")
        .arg(Arg::new("compile")
            .short('c')
            .long("compile")
            .value_name("FILE")
            .help("Path to the program that will be compiled.")
            .takes_value(true))
        .arg(Arg::new("output")
            .short('o')
            .long("output")
            .value_name("PATH")
            .help("Write the definitions file to PATH instead of running the program.")
            .takes_value(true)
            .requires("compile"))
        .arg(Arg::new("run")
            .short('r')
            .long("run")
            .value_name("PATH")
            .help("Run a definitions file written with --output.")
            .takes_value(true)
            .conflicts_with("compile"))
        .arg(Arg::new("cache")
            .long("cache")
            .value_name("DIR")
            .help("Reuse compiled modules stored in DIR.")
            .takes_value(true))
        .arg(Arg::new("heap")
            .long("heap")
            .value_name("CELLS")
            .help("Number of heap cells available to the program.")
            .takes_value(true))
        .arg(Arg::new("stack")
            .long("stack")
            .value_name("ENTRIES")
            .help("Size of the evaluation stack.")
            .takes_value(true))
        .arg(Arg::new("depth")
            .long("depth")
            .value_name("LEVELS")
            .help("How deeply strict evaluations may nest.")
            .takes_value(true))
        .arg(Arg::new("gc-stress")
            .long("gc-stress")
            .help("Collect garbage at every safe point.")
            .takes_value(false))
        .arg(Arg::new("visualize")
            .long("visualize")
            .value_name("PATH")
            .help("Write the combinator graph to PATH.dot and, if Graphviz is installed, PATH.pdf.")
            .takes_value(true)
            .requires("compile"))
        .arg(Arg::new("verbose")
            .short('v')
            .help("Log more. Repeat for debug and trace output.")
            .multiple_occurrences(true)
            .takes_value(false))
        .arg(Arg::new("args")
            .value_name("ARGS")
            .help("Arguments handed to the program.")
            .multiple_values(true)
            .last(true))
        .get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let code = match Runner::new(&matches).and_then(|runner| runner.run()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {}", err);
            1
        }
    };
    process::exit(code);
}

/// Coordinates compiling, writing and running programs as requested on the command line.
struct Runner<'a> {
    args: &'a ArgMatches,
    config: Config,
}

type RunResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

fn number(args: &ArgMatches, name: &str) -> RunResult<Option<usize>> {
    match args.value_of(name) {
        Some(v) => Ok(Some(
            v.parse()
                .map_err(|e| format!("invalid value {:?} for --{}: {}", v, name, e))?,
        )),
        None => Ok(None),
    }
}

impl<'a> Runner<'a> {
    fn new(args: &'a ArgMatches) -> RunResult<Self> {
        let mut config = Config::default()
            .with_gc_stress(args.is_present("gc-stress"))
            .with_args(
                args.values_of("args")
                    .map(|v| v.map(str::to_string).collect())
                    .unwrap_or_default(),
            );
        if let Some(cells) = number(args, "heap")? {
            config = config.with_heap_cells(cells);
        }
        if let Some(limit) = number(args, "stack")? {
            config = config.with_stack_limit(limit);
        }
        if let Some(limit) = number(args, "depth")? {
            config = config.with_depth_limit(limit);
        }
        if let Some(dir) = args.value_of("cache") {
            config = config.with_cache_dir(dir);
        }
        config.validate()?;
        Ok(Self { args, config })
    }

    /// Returns the exit status of the process.
    fn run(&self) -> RunResult<i32> {
        let image = match (self.args.value_of("compile"), self.args.value_of("run")) {
            (Some(path), _) => self.compile(path)?,
            (None, Some(path)) => {
                let bytes = fs::read(path).map_err(|e| format!("{}: {}", path, e))?;
                Image::decode(&bytes)?
            }
            (None, None) => return Err("nothing to do, pass --compile or --run".into()),
        };
        if let Some(output) = self.args.value_of("output") {
            fs::write(output, image.encode()).map_err(|e| format!("{}: {}", output, e))?;
            info!(output, "wrote definitions file");
            return Ok(0);
        }
        match run_image(&image, &self.config)? {
            Outcome::Exit(code) => Ok(code),
            Outcome::Value(value) => {
                // The unit result of an I/O program is not worth printing.
                if value != Value::con(0) {
                    println!("{}", value);
                }
                Ok(0)
            }
        }
    }

    fn compile(&self, path: &str) -> RunResult<Image> {
        let source = fs::read_to_string(path).map_err(|e| format!("{}: {}", path, e))?;
        let name = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Main");
        if let Some(out) = self.args.value_of("visualize") {
            let program = Compiler::new().compile_module(&parse_module(name, &source)?)?;
            let mut viz = Visualizer::new("g");
            viz.visualize_program(&program);
            viz.write_to_dot(&format!("{}.dot", out))?;
            if let Err(e) = viz.write_to_pdf(&format!("{}.pdf", out)) {
                warn!("no PDF written, is Graphviz installed? {}", e);
            }
        }
        Ok(compile_image(name, &source, &self.config)?)
    }
}
