use anyhow::{Result, anyhow, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::llm::gemini::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};
use crate::llm::groq::{DEFAULT_GROQ_BASE_URL, DEFAULT_GROQ_MODEL};
use crate::search::duckduckgo::{
    DEFAULT_DUCKDUCKGO_BASE_URL, DEFAULT_MAX_RESULTS, DEFAULT_SEARCH_REGION,
};
use crate::search::site::DEFAULT_SEARCH_SITE;

pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 10;

const CONFIG_DIR_NAME: &str = "krishi-sakhi";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub config_path: PathBuf,
    pub llm_provider: LlmProviderKind,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub groq_api_key: Option<String>,
    pub groq_model: String,
    pub groq_base_url: String,
    pub max_output_tokens: u32,
    pub search: SearchConfig,
    pub theme: ThemeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub site: String,
    pub base_url: String,
    pub region: String,
    pub max_results: usize,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            site: DEFAULT_SEARCH_SITE.to_string(),
            base_url: DEFAULT_DUCKDUCKGO_BASE_URL.to_string(),
            region: DEFAULT_SEARCH_REGION.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
            timeout_secs: DEFAULT_SEARCH_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    Gemini,
    Groq,
}

impl FromStr for LlmProviderKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "groq" => Ok(Self::Groq),
            _ => Err(format!(
                "unknown provider '{value}', expected 'gemini' or 'groq'"
            )),
        }
    }
}

impl Display for LlmProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => f.write_str("gemini"),
            Self::Groq => f.write_str("groq"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeConfig {
    pub preset: ThemePreset,
    pub styles: HashMap<ThemeToken, StyleOverride>,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            preset: ThemePreset::Default,
            styles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThemePreset {
    Default,
    Light,
    HighContrast,
}

impl FromStr for ThemePreset {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "default" => Ok(Self::Default),
            "light" => Ok(Self::Light),
            "high-contrast" => Ok(Self::HighContrast),
            _ => Err(format!("unknown preset '{value}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThemeToken {
    Prompt,
    AssistantText,
    AssistantWaiting,
    ProgressRequest,
    ProgressResult,
    SearchProvenance,
    HistoryUser,
    HistoryModel,
    SystemInfo,
    SystemError,
}

impl ThemeToken {
    pub fn all() -> &'static [ThemeToken] {
        &[
            Self::Prompt,
            Self::AssistantText,
            Self::AssistantWaiting,
            Self::ProgressRequest,
            Self::ProgressResult,
            Self::SearchProvenance,
            Self::HistoryUser,
            Self::HistoryModel,
            Self::SystemInfo,
            Self::SystemError,
        ]
    }
}

impl FromStr for ThemeToken {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "prompt" => Ok(Self::Prompt),
            "assistant_text" => Ok(Self::AssistantText),
            "assistant_waiting" => Ok(Self::AssistantWaiting),
            "progress_request" => Ok(Self::ProgressRequest),
            "progress_result" => Ok(Self::ProgressResult),
            "search_provenance" => Ok(Self::SearchProvenance),
            "history_user" => Ok(Self::HistoryUser),
            "history_model" => Ok(Self::HistoryModel),
            "system_info" => Ok(Self::SystemInfo),
            "system_error" => Ok(Self::SystemError),
            _ => Err(format!("unknown token '{value}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleOverride {
    pub fg: Option<HexColor>,
    pub bg: Option<HexColor>,
    pub modifiers: Option<Vec<ThemeModifier>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl FromStr for HexColor {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        const EXPECTED: &str = "invalid hex color, expected #RRGGBB";

        let Some(digits) = value.strip_prefix('#') else {
            return Err(EXPECTED.to_string());
        };
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(EXPECTED.to_string());
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16).map_err(|_| EXPECTED.to_string())
        };
        Ok(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeModifier {
    Bold,
    Dim,
    Italic,
    Underlined,
    Reversed,
    CrossedOut,
}

impl FromStr for ThemeModifier {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "bold" => Ok(Self::Bold),
            "dim" => Ok(Self::Dim),
            "italic" => Ok(Self::Italic),
            "underlined" => Ok(Self::Underlined),
            "reversed" => Ok(Self::Reversed),
            "crossed_out" => Ok(Self::CrossedOut),
            _ => Err(format!("unknown modifier '{value}'")),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFileConfig {
    llm_provider: Option<String>,
    gemini_api_key: Option<String>,
    gemini_model: Option<String>,
    gemini_base_url: Option<String>,
    groq_api_key: Option<String>,
    groq_model: Option<String>,
    groq_base_url: Option<String>,
    max_output_tokens: Option<u32>,
    search_site: Option<String>,
    search_base_url: Option<String>,
    search_region: Option<String>,
    search_max_results: Option<usize>,
    search_timeout_secs: Option<u64>,
    theme: Option<RawThemeConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawThemeConfig {
    name: Option<String>,
    styles: Option<HashMap<String, RawStyleOverride>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStyleOverride {
    fg: Option<String>,
    bg: Option<String>,
    modifiers: Option<Vec<String>>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    /// Environment beats the config file, which beats built-in defaults.
    ///
    /// An explicit `path` must exist; the discovered default path is optional.
    pub fn load_with_path(path: Option<&Path>) -> Result<Self> {
        let (config_path, file_config) = match path {
            Some(path) => {
                if !path.is_file() {
                    bail!("Failed to load config {}: file not found", path.display());
                }
                (path.to_path_buf(), load_file_config(path)?)
            }
            None => {
                let path = discover_config_path()?;
                let file_config = load_file_config(&path)?;
                (path, file_config)
            }
        };
        let file = file_config.unwrap_or_default();

        dotenvy::dotenv().ok();

        let llm_provider = match env_non_empty("KRISHI_LLM_PROVIDER") {
            Some(value) => LlmProviderKind::from_str(&value)
                .map_err(|reason| anyhow!("Invalid KRISHI_LLM_PROVIDER: {reason}"))?,
            None => match file.llm_provider.as_deref().and_then(non_empty) {
                Some(value) => LlmProviderKind::from_str(value)
                    .map_err(|reason| config_error(&config_path, "llm_provider", &reason))?,
                None => LlmProviderKind::Groq,
            },
        };

        let max_output_tokens = file.max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);
        if max_output_tokens == 0 {
            return Err(config_error(
                &config_path,
                "max_output_tokens",
                "must be greater than zero",
            ));
        }

        let search = SearchConfig {
            site: file_value(file.search_site.as_deref())
                .unwrap_or_else(|| DEFAULT_SEARCH_SITE.to_string()),
            base_url: env_non_empty("KRISHI_SEARCH_BASE_URL")
                .or_else(|| file_value(file.search_base_url.as_deref()))
                .unwrap_or_else(|| DEFAULT_DUCKDUCKGO_BASE_URL.to_string()),
            region: file_value(file.search_region.as_deref())
                .unwrap_or_else(|| DEFAULT_SEARCH_REGION.to_string()),
            max_results: file.search_max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            timeout_secs: file
                .search_timeout_secs
                .unwrap_or(DEFAULT_SEARCH_TIMEOUT_SECS),
        };
        if search.max_results == 0 {
            return Err(config_error(
                &config_path,
                "search_max_results",
                "must be greater than zero",
            ));
        }
        if search.timeout_secs == 0 {
            return Err(config_error(
                &config_path,
                "search_timeout_secs",
                "must be greater than zero",
            ));
        }

        let theme = validate_theme(file.theme.as_ref(), &config_path)?;

        Ok(Self {
            llm_provider,
            gemini_api_key: env_non_empty("GEMINI_API_KEY")
                .or_else(|| file_value(file.gemini_api_key.as_deref())),
            gemini_model: env_non_empty("GEMINI_MODEL")
                .or_else(|| file_value(file.gemini_model.as_deref()))
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            gemini_base_url: env_non_empty("GEMINI_BASE_URL")
                .or_else(|| file_value(file.gemini_base_url.as_deref()))
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            groq_api_key: env_non_empty("GROQ_API_KEY")
                .or_else(|| file_value(file.groq_api_key.as_deref())),
            groq_model: env_non_empty("GROQ_MODEL")
                .or_else(|| file_value(file.groq_model.as_deref()))
                .unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string()),
            groq_base_url: env_non_empty("GROQ_BASE_URL")
                .or_else(|| file_value(file.groq_base_url.as_deref()))
                .unwrap_or_else(|| DEFAULT_GROQ_BASE_URL.to_string()),
            max_output_tokens,
            search,
            theme,
            config_path,
        })
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let trimmed = xdg.trim();
        if trimmed.is_empty() {
            bail!("Failed to resolve config path: XDG_CONFIG_HOME is set but empty");
        }

        return Ok(PathBuf::from(trimmed)
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME));
    }

    let home = dirs::home_dir()
        .ok_or_else(|| anyhow!("Failed to resolve config path: HOME directory is unavailable"))?;

    Ok(home
        .join(".config")
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME))
}

fn load_file_config(config_path: &Path) -> Result<Option<RawFileConfig>> {
    if !config_path.is_file() {
        return Ok(None);
    }

    let config_text = fs::read_to_string(config_path).map_err(|err| {
        anyhow!(
            "Failed to load config {}: unable to read file: {err}",
            config_path.display()
        )
    })?;

    toml::from_str(&config_text)
        .map(Some)
        .map_err(|err| anyhow!("Failed to load config {}: {err}", config_path.display()))
}

fn validate_theme(raw_theme: Option<&RawThemeConfig>, config_path: &Path) -> Result<ThemeConfig> {
    let Some(theme) = raw_theme else {
        return Ok(ThemeConfig::default());
    };

    let mut config = ThemeConfig::default();

    if let Some(name) = &theme.name {
        config.preset = ThemePreset::from_str(name)
            .map_err(|reason| config_error(config_path, "theme.name", &reason))?;
    }

    for (token_name, raw_style) in theme.styles.iter().flatten() {
        let token = ThemeToken::from_str(token_name).map_err(|reason| {
            config_error(config_path, &format!("theme.styles.{token_name}"), &reason)
        })?;

        let fg = parse_color(raw_style.fg.as_deref(), config_path, token_name, "fg")?;
        let bg = parse_color(raw_style.bg.as_deref(), config_path, token_name, "bg")?;
        let modifiers = parse_modifiers(raw_style.modifiers.as_deref(), config_path, token_name)?;

        config.styles.insert(token, StyleOverride { fg, bg, modifiers });
    }

    Ok(config)
}

fn parse_color(
    value: Option<&str>,
    config_path: &Path,
    token_name: &str,
    field_name: &str,
) -> Result<Option<HexColor>> {
    value
        .map(|value| {
            HexColor::from_str(value).map_err(|reason| {
                config_error(
                    config_path,
                    &format!("theme.styles.{token_name}.{field_name}"),
                    &reason,
                )
            })
        })
        .transpose()
}

fn parse_modifiers(
    values: Option<&[String]>,
    config_path: &Path,
    token_name: &str,
) -> Result<Option<Vec<ThemeModifier>>> {
    let Some(values) = values else {
        return Ok(None);
    };

    values
        .iter()
        .map(|value| {
            ThemeModifier::from_str(value).map_err(|reason| {
                config_error(
                    config_path,
                    &format!("theme.styles.{token_name}.modifiers"),
                    &reason,
                )
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .and_then(|value| non_empty(&value).map(ToOwned::to_owned))
}

fn file_value(value: Option<&str>) -> Option<String> {
    value.and_then(non_empty).map(ToOwned::to_owned)
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn config_error(config_path: &Path, key_path: &str, reason: &str) -> anyhow::Error {
    anyhow!(
        "Failed to load config {}: {key_path}: {reason}",
        config_path.display()
    )
}
