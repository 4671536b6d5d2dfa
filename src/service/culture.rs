//! Culture-dependent formatting state and translation tables.

use crate::dto::LanguageDataDto;
use lazy_static::lazy_static;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct DateFormatInfo {
    pub short_date_pattern: String,
    pub short_time_pattern: String,
}

#[derive(Debug, Clone)]
pub struct NumberFormatInfo {
    pub decimal_separator: String,
    pub group_separator: String,
}

#[derive(Debug, Clone)]
pub struct CultureInfo {
    pub name: String,
    pub date_format: DateFormatInfo,
    pub number_format: NumberFormatInfo,
}

impl Default for CultureInfo {
    fn default() -> Self {
        INVARIANT_CULTURE.clone()
    }
}

lazy_static! {
    pub static ref INVARIANT_CULTURE: CultureInfo = CultureInfo {
        name: String::new(),
        date_format: DateFormatInfo {
            short_date_pattern: "MM/dd/yyyy".to_string(),
            short_time_pattern: "HH:mm".to_string(),
        },
        number_format: NumberFormatInfo {
            decimal_separator: ".".to_string(),
            group_separator: ",".to_string(),
        },
    };
    static ref KNOWN_CULTURES: HashMap<&'static str, CultureInfo> = {
        let mut cultures = HashMap::new();
        cultures.insert(
            "en-US",
            CultureInfo {
                name: "en-US".to_string(),
                date_format: DateFormatInfo {
                    short_date_pattern: "M/d/yyyy".to_string(),
                    short_time_pattern: "h:mm tt".to_string(),
                },
                number_format: NumberFormatInfo {
                    decimal_separator: ".".to_string(),
                    group_separator: ",".to_string(),
                },
            },
        );
        cultures.insert(
            "nl-BE",
            CultureInfo {
                name: "nl-BE".to_string(),
                date_format: DateFormatInfo {
                    short_date_pattern: "d/MM/yyyy".to_string(),
                    short_time_pattern: "HH:mm".to_string(),
                },
                number_format: NumberFormatInfo {
                    decimal_separator: ",".to_string(),
                    group_separator: ".".to_string(),
                },
            },
        );
        cultures.insert(
            "de-DE",
            CultureInfo {
                name: "de-DE".to_string(),
                date_format: DateFormatInfo {
                    short_date_pattern: "dd.MM.yyyy".to_string(),
                    short_time_pattern: "HH:mm".to_string(),
                },
                number_format: NumberFormatInfo {
                    decimal_separator: ",".to_string(),
                    group_separator: ".".to_string(),
                },
            },
        );
        cultures
    };
}

impl CultureInfo {
    /// Resolves a culture by name, falling back to the invariant culture.
    pub fn from_name(name: &str) -> CultureInfo {
        KNOWN_CULTURES
            .get(name)
            .cloned()
            .unwrap_or_else(|| INVARIANT_CULTURE.clone())
    }
}

/// Maps a .NET date/time pattern onto the equivalent chrono format string.
pub fn dotnet_to_chrono(pattern: &str) -> String {
    let mut result = String::with_capacity(pattern.len() * 2);
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let run = chars[i..].iter().take_while(|&&x| x == c).count();

        let (mapped, consumed): (&str, usize) = match (c, run) {
            ('d', r) if r >= 4 => ("%A", 4),
            ('d', 3) => ("%a", 3),
            ('d', 2) => ("%d", 2),
            ('d', _) => ("%-d", 1),
            ('M', r) if r >= 4 => ("%B", 4),
            ('M', 3) => ("%b", 3),
            ('M', 2) => ("%m", 2),
            ('M', _) => ("%-m", 1),
            ('y', r) if r >= 4 => ("%Y", 4),
            ('y', _) => ("%y", run.min(2)),
            ('H', r) if r >= 2 => ("%H", 2),
            ('H', _) => ("%-H", 1),
            ('h', r) if r >= 2 => ("%I", 2),
            ('h', _) => ("%-I", 1),
            ('m', r) if r >= 2 => ("%M", 2),
            ('m', _) => ("%-M", 1),
            ('s', r) if r >= 2 => ("%S", 2),
            ('s', _) => ("%-S", 1),
            ('t', _) => ("%p", run.min(2)),
            ('f', r) => ("%.3f", r),
            _ => {
                result.push(c);
                i += 1;
                continue;
            }
        };

        result.push_str(mapped);
        i += consumed;
    }

    result
}

/// One UI language: culture identifier plus its translated message table.
#[derive(Debug, Clone)]
pub struct Language {
    pub culture: String,
    pub name: String,
    pub is_default: bool,
    pub messages: HashMap<String, String>,
}

impl Language {
    pub fn new(data: &LanguageDataDto, culture: &str) -> Self {
        Self {
            culture: culture.to_string(),
            name: data.name.clone(),
            is_default: data.is_default,
            messages: data.messages.clone(),
        }
    }

    pub fn get_message(&self, key: &str) -> Option<&str> {
        self.messages.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn dotnet_patterns_map_to_chrono() {
        assert_eq!(dotnet_to_chrono("dd/MM/yyyy"), "%d/%m/%Y");
        assert_eq!(dotnet_to_chrono("M/d/yyyy"), "%-m/%-d/%Y");
        assert_eq!(dotnet_to_chrono("HH:mm"), "%H:%M");
    }

    #[test]
    fn mapped_pattern_formats_dates() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let pattern = dotnet_to_chrono("dd.MM.yyyy");
        assert_eq!(date.format(&pattern).to_string(), "09.03.2024");
    }

    #[test]
    fn unknown_culture_falls_back_to_invariant() {
        let culture = CultureInfo::from_name("xx-XX");
        assert_eq!(culture.date_format.short_date_pattern, "MM/dd/yyyy");
    }
}
