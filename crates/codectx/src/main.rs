//! Compile a namespace and print its prompt, or run code against it.
//!
//! Logs go to stderr; set `RUST_LOG` to see them (`warn` by default).
//!
//! # Examples
//!
//! ```sh
//! # Render the prompt for predefined source plus a stored context
//! codectx prompt --source kernel.ctx --store context.json
//!
//! # Run a reply, call `main(os)`, and save the updated context
//! codectx run --source kernel.ctx --store context.json \
//!   --code reply.ctx --target main --arg os --snapshot context.json
//!
//! # Resolve `use` statements and injections from a module directory
//! codectx --modules ./modules prompt --store context.json
//!
//! # Print the JSON schema of a context store
//! codectx schema store
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use codectx::{
    ContextStore, Execution, ExecutionRuntime, ModuleRegistry, NamespaceCompiler, RuntimeConfig,
    json_schema_for,
};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "codectx", version, about)]
struct Cli {
    /// Runtime config file (JSON); unset fields keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of `*.ctx` modules for `use` statements and injections
    #[arg(long, global = true)]
    modules: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the prompt for a compiled namespace
    Prompt {
        #[command(flatten)]
        namespace: NamespaceArgs,
    },

    /// Execute code in a compiled namespace
    Run {
        #[command(flatten)]
        namespace: NamespaceArgs,

        /// File with the code to run (`-` reads stdin)
        #[arg(long)]
        code: PathBuf,

        /// Name read back, or called when arguments are given
        #[arg(long)]
        target: String,

        /// Namespace value passed positionally (repeatable)
        #[arg(long = "arg")]
        args: Vec<String>,

        /// Namespace value passed by keyword (repeatable)
        #[arg(long = "kwarg")]
        kwargs: Vec<String>,

        /// Call the target even without arguments
        #[arg(long)]
        call: bool,

        /// Write the context snapshot here
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Print a JSON schema
    Schema {
        #[arg(value_enum, default_value_t = SchemaKind::Store)]
        kind: SchemaKind,
    },
}

#[derive(clap::Args)]
struct NamespaceArgs {
    /// Predefined source file; defaults to the store's module
    #[arg(long)]
    source: Option<PathBuf>,

    /// Context store file (JSON)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Namespace and facade display name
    #[arg(long, default_value = "Kernel")]
    name: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaKind {
    Store,
    Config,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).compact())
        .init();
}

fn compile(cli: &Cli, args: &NamespaceArgs) -> Result<ExecutionRuntime, String> {
    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path).map_err(|e| format!("{}: {e}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    let mut compiler = NamespaceCompiler::new(config);
    if let Some(path) = &args.store {
        let store = ContextStore::load(path).map_err(|e| format!("{}: {e}", path.display()))?;
        compiler = compiler.with_store(store);
    }
    if let Some(path) = &args.source {
        compiler = compiler.with_source(read_text(path)?);
    }
    if let Some(dir) = &cli.modules {
        let registry =
            ModuleRegistry::from_dir(dir).map_err(|e| format!("{}: {e}", dir.display()))?;
        compiler = compiler.with_resolver(Rc::new(registry));
    }
    compiler.compile(&args.name).map_err(|e| e.to_string())
}

fn read_text(path: &Path) -> Result<String, String> {
    if path == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| format!("stdin: {e}"))?;
        return Ok(text);
    }
    std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))
}

fn run(cli: &Cli) -> Result<String, String> {
    match &cli.command {
        Command::Prompt { namespace } => {
            let runtime = compile(cli, namespace)?;
            let prompt = runtime.prompt().map_err(|e| e.to_string());
            runtime.destroy().map_err(|e| e.to_string())?;
            prompt.map(|text| format!("{text}\n"))
        }
        Command::Run {
            namespace,
            code,
            target,
            args,
            kwargs,
            call,
            snapshot,
        } => {
            let code = read_text(code)?;
            let mut request = if *call {
                Execution::call(code, target.as_str())
            } else {
                Execution::read(code, target.as_str())
            };
            for name in args {
                request = request.arg(name.as_str());
            }
            for name in kwargs {
                request = request.kwarg(name.as_str());
            }
            let runtime = compile(cli, namespace)?;
            let outcome = runtime.execute(request);
            runtime.destroy().map_err(|e| e.to_string())?;
            let result = outcome.map_err(|e| e.to_string())?;
            if let Some(path) = snapshot {
                result
                    .context()
                    .save(path)
                    .map_err(|e| format!("{}: {e}", path.display()))?;
            }
            let mut out = result.output().to_string();
            if let Some(value) = result.return_json().map_err(|e| e.to_string())? {
                let text = serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?;
                out.push_str(&text);
                out.push('\n');
            }
            Ok(out)
        }
        Command::Schema { kind } => {
            let schema = match kind {
                SchemaKind::Store => json_schema_for::<ContextStore>(),
                SchemaKind::Config => json_schema_for::<RuntimeConfig>(),
            };
            serde_json::to_string_pretty(&schema)
                .map(|text| format!("{text}\n"))
                .map_err(|e| e.to_string())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    match run(&cli) {
        Ok(out) => print!("{out}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
