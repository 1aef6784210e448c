use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::loader::ErrorMode;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Map spending rows onto a dimensional model and aggregate them",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate a model document and report every violation
    Validate(ModelArgs),
    /// List the dimensions and views a model declares
    Views(ModelArgs),
    /// Map CSV rows into fact records
    Load(LoadArgs),
    /// Run a named view or an ad-hoc drilldown query over mapped rows
    Aggregate(AggregateArgs),
    /// List the classifier entries observed for a taxonomy
    Taxonomy(TaxonomyArgs),
}

#[derive(Debug, Args)]
pub struct ModelArgs {
    /// Model document (.json, otherwise YAML)
    #[arg(short, long)]
    pub model: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum ModeArg {
    Strict,
    Lenient,
}

impl From<ModeArg> for ErrorMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Strict => ErrorMode::Strict,
            ModeArg::Lenient => ErrorMode::Lenient,
        }
    }
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Model document (.json, otherwise YAML)
    #[arg(short, long)]
    pub model: PathBuf,
    /// Source CSV file with a header row (`-` for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// How rows that cannot be mapped are handled
    #[arg(long, value_enum)]
    pub mode: ModeArg,
    /// Worker threads for mapping and aggregation (defaults to available cores)
    #[arg(long)]
    pub workers: Option<usize>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Write mapped facts as JSON lines (stdout when `-`)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct AggregateArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Named view to execute
    #[arg(long, conflicts_with_all = ["drilldowns", "cuts", "slices", "order", "page"])]
    pub view: Option<String>,
    /// Entity scope of the view: dataset (default), classifier or entity
    #[arg(long, requires = "view")]
    pub entity: Option<String>,
    /// Subject dimension when several views share a name
    #[arg(long, requires = "view")]
    pub dimension: Option<String>,
    /// Restrict a classifier or entity view to one member by name
    #[arg(long, requires = "view")]
    pub member: Option<String>,
    /// Field to group by; repeat for nested drilldowns
    #[arg(long = "drilldown", action = clap::ArgAction::Append)]
    pub drilldowns: Vec<String>,
    /// Cuts of the form `field:value`; repeated values of one field are OR-ed
    #[arg(long = "cut", action = clap::ArgAction::Append)]
    pub cuts: Vec<String>,
    /// Slice group such as `region=London;time.year>=2009`; repeated groups are OR-ed
    #[arg(long = "slice", action = clap::ArgAction::Append)]
    pub slices: Vec<String>,
    /// Measure to sum (defaults to every measure)
    #[arg(long = "measure", action = clap::ArgAction::Append)]
    pub measures: Vec<String>,
    /// Ordering directives of the form `field[:asc|desc]`
    #[arg(long = "order", action = clap::ArgAction::Append)]
    pub order: Vec<String>,
    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    pub page: usize,
    /// Rows per page (all rows when omitted)
    #[arg(long)]
    pub pagesize: Option<usize>,
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct TaxonomyArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Taxonomy name
    #[arg(long)]
    pub taxonomy: String,
    /// Level to list (defaults to every level)
    #[arg(long)]
    pub level: Option<u32>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
