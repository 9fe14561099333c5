use crate::error::ConfigError;
use crate::metadata::{FieldSignature, MetaField};
use crate::sanitize::is_disallowed_char;
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

/// One slot of the filename layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Date,
    Prefix,
    Additional,
    Camera,
    Lens,
    Counter,
    Meta(MetaField),
}

impl Component {
    pub const DEFAULT_ORDER: [Component; 6] = [
        Component::Date,
        Component::Prefix,
        Component::Additional,
        Component::Camera,
        Component::Lens,
        Component::Counter,
    ];
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date => f.write_str("Date"),
            Self::Prefix => f.write_str("Prefix"),
            Self::Additional => f.write_str("Additional"),
            Self::Camera => f.write_str("Camera"),
            Self::Lens => f.write_str("Lens"),
            Self::Counter => f.write_str("Counter"),
            Self::Meta(field) => write!(f, "Meta_{}", field.key()),
        }
    }
}

impl FromStr for Component {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        if let Some(field) = lower
            .strip_prefix("meta_")
            .or_else(|| lower.strip_prefix("meta:"))
        {
            if field.is_empty() {
                return Err(ConfigError::UnknownMetaField(String::new()));
            }
            return field.parse().map(Component::Meta);
        }
        match lower.as_str() {
            "date" => Ok(Self::Date),
            "prefix" => Ok(Self::Prefix),
            "additional" => Ok(Self::Additional),
            "camera" => Ok(Self::Camera),
            "lens" => Ok(Self::Lens),
            "counter" | "number" => Ok(Self::Counter),
            _ => Err(ConfigError::UnknownComponent(trimmed.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DateFormat {
    #[default]
    #[serde(rename = "YYYY-MM-DD")]
    YearMonthDayDash,
    #[serde(rename = "YYYY_MM_DD")]
    YearMonthDayUnderscore,
    #[serde(rename = "DD-MM-YYYY")]
    DayMonthYearDash,
    #[serde(rename = "DD_MM_YYYY")]
    DayMonthYearUnderscore,
    #[serde(rename = "YYYYMMDD")]
    Compact,
    #[serde(rename = "MM-DD-YYYY")]
    MonthDayYearDash,
    #[serde(rename = "MM_DD_YYYY")]
    MonthDayYearUnderscore,
}

impl DateFormat {
    pub const ALL: [DateFormat; 7] = [
        DateFormat::YearMonthDayDash,
        DateFormat::YearMonthDayUnderscore,
        DateFormat::DayMonthYearDash,
        DateFormat::DayMonthYearUnderscore,
        DateFormat::Compact,
        DateFormat::MonthDayYearDash,
        DateFormat::MonthDayYearUnderscore,
    ];

    pub fn pattern(self) -> &'static str {
        match self {
            Self::YearMonthDayDash => "YYYY-MM-DD",
            Self::YearMonthDayUnderscore => "YYYY_MM_DD",
            Self::DayMonthYearDash => "DD-MM-YYYY",
            Self::DayMonthYearUnderscore => "DD_MM_YYYY",
            Self::Compact => "YYYYMMDD",
            Self::MonthDayYearDash => "MM-DD-YYYY",
            Self::MonthDayYearUnderscore => "MM_DD_YYYY",
        }
    }

    pub fn format(self, date: NaiveDate) -> String {
        let (y, m, d) = (date.year(), date.month(), date.day());
        match self {
            Self::YearMonthDayDash => format!("{:04}-{:02}-{:02}", y, m, d),
            Self::YearMonthDayUnderscore => format!("{:04}_{:02}_{:02}", y, m, d),
            Self::DayMonthYearDash => format!("{:02}-{:02}-{:04}", d, m, y),
            Self::DayMonthYearUnderscore => format!("{:02}_{:02}_{:04}", d, m, y),
            Self::Compact => format!("{:04}{:02}{:02}", y, m, d),
            Self::MonthDayYearDash => format!("{:02}-{:02}-{:04}", m, d, y),
            Self::MonthDayYearUnderscore => format!("{:02}_{:02}_{:04}", m, d, y),
        }
    }

    /// Renders a `YYYYMMDD` date string; `None` when it is not a real date.
    pub fn format_compact(self, compact: &str) -> Option<String> {
        NaiveDate::parse_from_str(compact, "%Y%m%d")
            .ok()
            .map(|date| self.format(date))
    }
}

impl FromStr for DateFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|format| format.pattern().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownDateFormat(wanted.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterMode {
    /// One counter per capture date.
    DateReset,
    /// Dates disabled: one counter for the whole batch.
    Global,
    /// Dates enabled, counter never resets.
    Continuous,
}

/// Which filesystem times to align with the capture timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampOptions {
    pub creation: bool,
    pub modification: bool,
    pub access: bool,
    /// Overrides the metadata timestamp for every file.
    pub custom: Option<NaiveDateTime>,
    /// Only synchronise, keep the current names.
    pub leave_names: bool,
}

impl TimestampOptions {
    pub fn any_field(&self) -> bool {
        self.creation || self.modification || self.access
    }
}

/// Loosely-typed rename settings as they come from a config file or flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameOptions {
    pub order: Vec<String>,
    pub separator: String,
    pub date_format: String,
    pub use_date: bool,
    pub prefix: String,
    pub additional: String,
    pub use_camera: bool,
    pub use_lens: bool,
    pub meta_fields: Vec<String>,
    pub continuous_counter: bool,
    pub timestamps: Option<TimestampOptions>,
    pub write_provenance: bool,
}

impl Default for RenameOptions {
    fn default() -> Self {
        Self {
            order: Component::DEFAULT_ORDER
                .iter()
                .map(ToString::to_string)
                .collect(),
            separator: "-".to_string(),
            date_format: DateFormat::default().pattern().to_string(),
            use_date: true,
            prefix: String::new(),
            additional: String::new(),
            use_camera: false,
            use_lens: false,
            meta_fields: Vec::new(),
            continuous_counter: false,
            timestamps: None,
            write_provenance: true,
        }
    }
}

/// Validated, immutable settings for one rename run.
#[derive(Debug, Clone, PartialEq)]
pub struct RenameConfig {
    order: Vec<Component>,
    separator: String,
    date_format: DateFormat,
    use_date: bool,
    prefix: Option<String>,
    additional: Option<String>,
    use_camera: bool,
    use_lens: bool,
    meta_fields: Vec<MetaField>,
    continuous: bool,
    timestamps: Option<TimestampOptions>,
    write_provenance: bool,
}

impl RenameConfig {
    pub fn new(options: RenameOptions) -> Result<Self, ConfigError> {
        let mut order = Vec::with_capacity(options.order.len());
        for name in &options.order {
            let component: Component = name.parse()?;
            if order.contains(&component) {
                return Err(ConfigError::DuplicateComponent(component.to_string()));
            }
            order.push(component);
        }

        if options.separator.chars().any(is_disallowed_char) {
            return Err(ConfigError::InvalidSeparator(options.separator));
        }

        let mut meta_fields = Vec::with_capacity(options.meta_fields.len());
        for name in &options.meta_fields {
            if name.trim().is_empty() {
                return Err(ConfigError::UnknownMetaField(String::new()));
            }
            let field: MetaField = name.parse()?;
            if !meta_fields.contains(&field) {
                meta_fields.push(field);
            }
        }

        Ok(Self {
            order,
            separator: options.separator,
            date_format: options.date_format.parse()?,
            use_date: options.use_date,
            prefix: non_empty(options.prefix),
            additional: non_empty(options.additional),
            use_camera: options.use_camera,
            use_lens: options.use_lens,
            meta_fields,
            continuous: options.continuous_counter,
            timestamps: options.timestamps,
            write_provenance: options.write_provenance,
        })
    }

    pub fn order(&self) -> &[Component] {
        &self.order
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn date_format(&self) -> DateFormat {
        self.date_format
    }

    pub fn use_date(&self) -> bool {
        self.use_date
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn additional(&self) -> Option<&str> {
        self.additional.as_deref()
    }

    pub fn use_camera(&self) -> bool {
        self.use_camera
    }

    pub fn use_lens(&self) -> bool {
        self.use_lens
    }

    pub fn meta_fields(&self) -> &[MetaField] {
        &self.meta_fields
    }

    pub fn timestamps(&self) -> Option<&TimestampOptions> {
        self.timestamps.as_ref()
    }

    pub fn write_provenance(&self) -> bool {
        self.write_provenance
    }

    pub fn counter_mode(&self) -> CounterMode {
        match (self.use_date, self.continuous) {
            (false, _) => CounterMode::Global,
            (true, false) => CounterMode::DateReset,
            (true, true) => CounterMode::Continuous,
        }
    }

    /// Fields every lookup of this run asks for. Capture dates are always
    /// included since ordering depends on them.
    pub fn field_signature(&self) -> FieldSignature {
        FieldSignature {
            date: true,
            camera: self.use_camera,
            lens: self.use_lens,
            extras: !self.meta_fields.is_empty(),
        }
    }
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            order: Component::DEFAULT_ORDER.to_vec(),
            separator: "-".to_string(),
            date_format: DateFormat::default(),
            use_date: true,
            prefix: None,
            additional: None,
            use_camera: false,
            use_lens: false,
            meta_fields: Vec::new(),
            continuous: false,
            timestamps: None,
            write_provenance: true,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Settings read from `config.toml`. Never written back by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub recursive_default: bool,
    pub include_hidden_default: bool,
    pub exiftool_path: Option<PathBuf>,
    pub provider_timeout_secs: u64,
    /// Base deadline for provenance writes; one second per file is added.
    pub write_timeout_secs: u64,
    pub rename: RenameOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            recursive_default: false,
            include_hidden_default: false,
            exiftool_path: None,
            provider_timeout_secs: crate::provider::DEFAULT_PROVIDER_TIMEOUT.as_secs(),
            write_timeout_secs: crate::provider::DEFAULT_WRITE_TIMEOUT.as_secs(),
            rename: RenameOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub config_path: PathBuf,
    pub undo_path: PathBuf,
}

pub fn app_paths() -> Result<AppPaths> {
    let proj = ProjectDirs::from("com", "exif-renamer", "exif-renamer")
        .context("could not determine the platform config directory")?;
    let config_dir = proj.config_dir().to_path_buf();
    let data_dir = proj.data_dir().to_path_buf();
    Ok(AppPaths {
        config_path: config_dir.join("config.toml"),
        undo_path: data_dir.join("undo-last.json"),
        config_dir,
    })
}

pub fn load_config() -> Result<AppConfig> {
    let paths = app_paths()?;
    load_config_from(&paths.config_path)
}

pub fn load_config_from(path: &std::path::Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config = toml::from_str::<AppConfig>(&raw)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(config)
}
