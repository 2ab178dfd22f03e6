use crate::config::{
    HexColor, StyleOverride, ThemeConfig as UserThemeConfig, ThemeModifier, ThemePreset, ThemeToken,
};
use crossterm::style::{Attribute, Attributes, Color, ContentStyle};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Theme {
    enabled: bool,
    styles: HashMap<ThemeToken, ContentStyle>,
}

impl Theme {
    pub fn from_config(enabled: bool, config: &UserThemeConfig) -> Self {
        let mut styles = preset_styles(config.preset);
        for (token, override_style) in &config.styles {
            let base = styles.get(token).copied().unwrap_or_default();
            styles.insert(*token, merge_style(base, override_style));
        }

        Self { enabled, styles }
    }

    /// Plain text when colour is off (`NO_COLOR`, not a terminal).
    pub fn disabled() -> Self {
        Self::from_config(false, &UserThemeConfig::default())
    }

    pub fn style(&self, token: ThemeToken) -> ContentStyle {
        if !self.enabled {
            return ContentStyle::default();
        }

        self.styles.get(&token).copied().unwrap_or_default()
    }

    pub fn paint(&self, token: ThemeToken, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        self.style(token).apply(text).to_string()
    }
}

fn preset_styles(preset: ThemePreset) -> HashMap<ThemeToken, ContentStyle> {
    ThemeToken::all()
        .iter()
        .copied()
        .map(|token| (token, preset_style(preset, token)))
        .collect()
}

fn preset_style(preset: ThemePreset, token: ThemeToken) -> ContentStyle {
    match preset {
        ThemePreset::Default => default_preset_style(token),
        ThemePreset::Light => light_preset_style(token),
        ThemePreset::HighContrast => high_contrast_preset_style(token),
    }
}

fn fg(r: u8, g: u8, b: u8) -> ContentStyle {
    ContentStyle {
        foreground_color: Some(Color::Rgb { r, g, b }),
        ..ContentStyle::default()
    }
}

fn with(mut style: ContentStyle, attribute: Attribute) -> ContentStyle {
    style.attributes.set(attribute);
    style
}

fn default_preset_style(token: ThemeToken) -> ContentStyle {
    match token {
        ThemeToken::Prompt => with(fg(158, 206, 106), Attribute::Bold),
        ThemeToken::AssistantText => fg(224, 222, 214),
        ThemeToken::AssistantWaiting => with(fg(206, 170, 100), Attribute::Italic),
        ThemeToken::ProgressRequest => with(fg(138, 138, 138), Attribute::Italic),
        ThemeToken::ProgressResult => fg(138, 138, 138),
        ThemeToken::SearchProvenance => with(fg(122, 162, 247), Attribute::Bold),
        ThemeToken::HistoryUser => fg(158, 206, 106),
        ThemeToken::HistoryModel => fg(192, 202, 245),
        ThemeToken::SystemInfo => fg(86, 95, 137),
        ThemeToken::SystemError => with(fg(247, 118, 142), Attribute::Bold),
    }
}

fn light_preset_style(token: ThemeToken) -> ContentStyle {
    match token {
        ThemeToken::Prompt => with(fg(5, 80, 40), Attribute::Bold),
        ThemeToken::AssistantText => fg(36, 41, 47),
        ThemeToken::AssistantWaiting => with(fg(130, 70, 0), Attribute::Italic),
        ThemeToken::ProgressRequest => with(fg(80, 90, 110), Attribute::Italic),
        ThemeToken::ProgressResult => fg(80, 90, 110),
        ThemeToken::SearchProvenance => with(fg(9, 105, 218), Attribute::Bold),
        ThemeToken::HistoryUser => fg(5, 80, 40),
        ThemeToken::HistoryModel => fg(9, 105, 218),
        ThemeToken::SystemInfo => fg(36, 70, 120),
        ThemeToken::SystemError => with(fg(176, 0, 32), Attribute::Bold),
    }
}

fn high_contrast_preset_style(token: ThemeToken) -> ContentStyle {
    match token {
        ThemeToken::Prompt => with(fg(0, 255, 127), Attribute::Bold),
        ThemeToken::AssistantText => fg(255, 255, 255),
        ThemeToken::AssistantWaiting => with(fg(255, 255, 0), Attribute::Bold),
        ThemeToken::ProgressRequest => with(fg(220, 220, 220), Attribute::Italic),
        ThemeToken::ProgressResult => fg(220, 220, 220),
        ThemeToken::SearchProvenance => with(fg(135, 206, 250), Attribute::Bold),
        ThemeToken::HistoryUser => fg(0, 255, 127),
        ThemeToken::HistoryModel => fg(255, 215, 0),
        ThemeToken::SystemInfo => fg(173, 216, 230),
        ThemeToken::SystemError => with(fg(255, 64, 64), Attribute::Bold),
    }
}

fn merge_style(base: ContentStyle, override_style: &StyleOverride) -> ContentStyle {
    let mut merged = base;

    if let Some(fg) = override_style.fg {
        merged.foreground_color = Some(color_from_hex(fg));
    }

    if let Some(bg) = override_style.bg {
        merged.background_color = Some(color_from_hex(bg));
    }

    if let Some(modifiers) = &override_style.modifiers {
        merged.attributes = modifiers
            .iter()
            .copied()
            .fold(Attributes::default(), |acc, modifier| {
                acc | attribute_for(modifier)
            });
    }

    merged
}

fn color_from_hex(color: HexColor) -> Color {
    Color::Rgb {
        r: color.r,
        g: color.g,
        b: color.b,
    }
}

fn attribute_for(modifier: ThemeModifier) -> Attribute {
    match modifier {
        ThemeModifier::Bold => Attribute::Bold,
        ThemeModifier::Dim => Attribute::Dim,
        ThemeModifier::Italic => Attribute::Italic,
        ThemeModifier::Underlined => Attribute::Underlined,
        ThemeModifier::Reversed => Attribute::Reverse,
        ThemeModifier::CrossedOut => Attribute::CrossedOut,
    }
}
