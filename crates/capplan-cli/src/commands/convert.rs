use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use capplan_convert::{Conversion, OutputFormat};
use capplan_core::{CapplanConfig, ConvertSettings, RowErrorPolicy};
use clap::Args;
use tracing::{info, warn};

/// Where rows come from and how they are read.
#[derive(Args)]
pub struct SheetArgs {
    /// Sizing sheet (.csv, .tsv, .xlsx, .xls, .ods)
    #[arg(short, long)]
    pub input: PathBuf,
    /// Worksheet name for spreadsheet inputs (first sheet by default)
    #[arg(long)]
    pub sheet: Option<String>,
    /// Keep only rows whose env/environment column matches
    #[arg(long)]
    pub env: Option<String>,
    /// Skip invalid rows instead of aborting on the first one
    #[arg(long)]
    pub skip_invalid: bool,
    /// Round dataset sizes to this many decimals
    #[arg(long)]
    pub precision: Option<u32>,
    /// Module applied to rows that list none (repeatable)
    #[arg(long = "default-module", value_name = "MODULE")]
    pub default_modules: Vec<String>,
}

impl SheetArgs {
    /// Command-line values layered over the `[convert]` section.
    pub fn settings(&self, base: &ConvertSettings) -> ConvertSettings {
        let mut settings = base.clone();
        if self.skip_invalid {
            settings.on_invalid_row = RowErrorPolicy::Skip;
        }
        if self.sheet.is_some() {
            settings.sheet = self.sheet.clone();
        }
        if self.env.is_some() {
            settings.env_filter = self.env.clone();
        }
        if self.precision.is_some() {
            settings.size_precision = self.precision;
        }
        if !self.default_modules.is_empty() {
            settings.default_modules = self.default_modules.clone();
        }
        settings
    }

    pub fn convert(&self, config: &CapplanConfig) -> anyhow::Result<Conversion> {
        let conversion = capplan_convert::convert(&self.input, &self.settings(&config.convert))?;
        for skipped in &conversion.skipped {
            warn!(line = skipped.line, error = %skipped.error, "row skipped");
        }
        Ok(conversion)
    }
}

#[derive(Args)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub sheet: SheetArgs,
    /// Output document: combined, databases, subscription or tfvars
    #[arg(short, long, default_value = "combined")]
    pub format: OutputFormat,
    /// Output path, `-` for stdout
    #[arg(short, long, default_value = "-")]
    pub out: PathBuf,
    /// Also write a Terraform snippet consuming the tfvars document
    #[arg(long)]
    pub emit_hcl: Option<PathBuf>,
    /// Print a conversion summary to stderr
    #[arg(long)]
    pub summary: bool,
}

pub fn run(args: &ConvertArgs, config: &CapplanConfig) -> anyhow::Result<()> {
    let conversion = args.sheet.convert(config)?;

    if args.out.as_os_str() == "-" {
        let stdout = std::io::stdout();
        capplan_convert::emit(
            &conversion.resources,
            &conversion.plan,
            args.format,
            stdout.lock(),
        )?;
    } else {
        let file = File::create(&args.out)?;
        capplan_convert::emit(
            &conversion.resources,
            &conversion.plan,
            args.format,
            BufWriter::new(file),
        )?;
        info!(path = %args.out.display(), format = %args.format, "payload written");
    }

    if let Some(path) = &args.emit_hcl {
        let mut file = File::create(path)?;
        file.write_all(capplan_convert::hcl_snippet().as_bytes())?;
        info!(path = %path.display(), "terraform snippet written");
    }

    if args.summary {
        eprintln!("{}", capplan_convert::report::format_summary(&conversion));
    }

    Ok(())
}
