//! miscctl - exercise a misc device multiplexer from a manifest
//!
//! Commands:
//! - `miscctl list` - Show the /proc/misc listing
//! - `miscctl nodes` - Show published device nodes
//! - `miscctl aliases` - Show on-demand aliases and whether they loaded
//! - `miscctl open <minor>` - Open a minor and report where it landed
//! - `miscctl read <minor>` - Open a minor and read from it
//! - `miscctl write <minor> <data>` - Open a minor, write, read back

mod handlers;
mod manifest;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use kaal_miscdev::{
    CharDevices, DevClass, DevT, File, FileMode, Misc, MiscDevice, Module, ModuleTable,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use manifest::{DeviceSpec, Manifest};

#[derive(Parser)]
#[command(name = "miscctl")]
#[command(author = "KaaL Team")]
#[command(version)]
#[command(about = "Misc device multiplexer playground", long_about = None)]
struct Cli {
    /// Device manifest
    #[arg(short, long, default_value = "misc.toml")]
    manifest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show registered devices
    List,

    /// Show published device nodes
    Nodes,

    /// Show on-demand aliases
    Aliases,

    /// Open a minor and report the node it resolved to
    Open { minor: u32 },

    /// Open a minor and read from it
    Read {
        minor: u32,

        /// Bytes to read
        #[arg(short, long, default_value_t = 16)]
        count: usize,
    },

    /// Open a minor, write to it, then read back
    Write { minor: u32, data: String },
}

/// Everything a manifest boots into
struct System {
    chrdevs: CharDevices,
    class: Arc<DevClass>,
    table: Arc<ModuleTable>,
    misc: Misc,
    modules: BTreeMap<String, Arc<Module>>,
}

impl System {
    fn boot(manifest: &Manifest) -> anyhow::Result<Self> {
        let chrdevs = CharDevices::new();
        let class = Arc::new(DevClass::new(manifest.misc.class_name.clone()));
        let table = Arc::new(ModuleTable::new());
        let misc = Misc::init(manifest.misc.clone(), &chrdevs, class.clone(), table.clone())?;

        let mut system = Self {
            chrdevs,
            class,
            table,
            misc,
            modules: BTreeMap::new(),
        };
        for spec in &manifest.devices {
            system.add(spec)?;
        }
        Ok(system)
    }

    fn add(&mut self, spec: &DeviceSpec) -> anyhow::Result<()> {
        let owner = spec.module.as_ref().map(|name| {
            Arc::clone(
                self.modules
                    .entry(name.clone())
                    .or_insert_with(|| Module::new(name.clone())),
            )
        });

        let mut builder = MiscDevice::builder(handlers::build(spec, owner));
        if let Some(name) = &spec.name {
            builder = builder.name(name.clone());
        }
        if let Some(minor) = spec.fixed_minor() {
            builder = builder.minor(minor);
        }
        if let Some(devnode) = &spec.devnode {
            builder = builder.devnode(devnode.clone());
        }
        let device = builder.build();

        match spec.fixed_minor() {
            Some(minor) if spec.on_demand => {
                let alias = self.misc.config().module_alias(minor);
                log::debug!("{} deferred to {}", spec.label(), alias);
                self.table.alias(alias, move |misc: &Misc| {
                    misc.register(&device)
                        .map(|_| ())
                        .map_err(|err| err.errno())
                });
            }
            _ => {
                self.misc
                    .register(&device)
                    .with_context(|| format!("registering {}", spec.label()))?;
            }
        }
        Ok(())
    }

    fn open(&self, minor: u32, mode: FileMode) -> anyhow::Result<File> {
        let devt = DevT::new(self.misc.config().major, minor);
        self.chrdevs
            .open(devt, mode)
            .map_err(|errno| anyhow::anyhow!("open {} failed: {}", devt, errno))
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let manifest = Manifest::load(&cli.manifest)
        .with_context(|| format!("loading {}", cli.manifest.display()))?;
    let system = System::boot(&manifest)?;

    match cli.command {
        Commands::List => show_list(&system),
        Commands::Nodes => show_nodes(&system),
        Commands::Aliases => show_aliases(&system),
        Commands::Open { minor } => open_minor(&system, minor)?,
        Commands::Read { minor, count } => read_minor(&system, minor, count)?,
        Commands::Write { minor, data } => write_minor(&system, minor, &data)?,
    }

    Ok(())
}

fn show_list(system: &System) {
    println!("{}", system.misc.proc_path().bold());
    print!("{}", system.misc.proc_show());
    println!(
        "\n{} devices, {} dynamic minors in use",
        system.misc.len(),
        system.misc.minor_map().count()
    );
}

fn show_nodes(system: &System) {
    for (devt, path) in system.class.nodes() {
        println!("{:>7}  {}", devt.to_string().cyan(), path);
    }
}

fn show_aliases(system: &System) {
    for alias in system.table.aliases() {
        let state = if system.table.is_loaded(&alias) {
            "loaded".green()
        } else {
            "pending".yellow()
        };
        println!("{}  {}", alias, state);
    }
    for (name, module) in &system.modules {
        println!("module {}  refs={}", name.bold(), module.refcount());
    }
}

fn open_minor(system: &System, minor: u32) -> anyhow::Result<()> {
    let file = system.open(minor, FileMode::READ)?;
    let path = system
        .class
        .node_path(file.devt())
        .unwrap_or_else(|| "<no node>".to_string());
    println!("{} {} -> {}", "✅".green(), file.devt(), path.bold());

    file.close()
        .map_err(|errno| anyhow::anyhow!("release failed: {}", errno))
}

fn read_minor(system: &System, minor: u32, count: usize) -> anyhow::Result<()> {
    let mut file = system.open(minor, FileMode::READ)?;
    let mut buf = vec![0u8; count];
    let read = file
        .read(&mut buf)
        .map_err(|errno| anyhow::anyhow!("read failed: {}", errno))?;

    println!("{} {} bytes from {}", "✅".green(), read, file.devt());
    println!("{}", hex(&buf[..read]));
    Ok(())
}

fn write_minor(system: &System, minor: u32, data: &str) -> anyhow::Result<()> {
    let mut file = system.open(minor, FileMode::READ | FileMode::WRITE)?;
    let written = file
        .write(data.as_bytes())
        .map_err(|errno| anyhow::anyhow!("write failed: {}", errno))?;
    println!("{} {} bytes to {}", "✅".green(), written, file.devt());

    let mut buf = vec![0u8; written];
    match file.read(&mut buf) {
        Ok(read) => println!("read back: {}", hex(&buf[..read])),
        Err(errno) => println!("read back: {}", errno.to_string().yellow()),
    }

    file.close()
        .map_err(|errno| anyhow::anyhow!("release failed: {}", errno))
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
