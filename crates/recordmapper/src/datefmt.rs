//! Date patterns in the `yyyy-MM-dd HH:mm:ss` style used by mapping expressions,
//! translated to chrono format strings.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fmt::Write;

/// Text form used when a date is rendered without an explicit pattern.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn to_chrono_format(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '\'' {
            // '' is an escaped quote, otherwise copy until the closing quote
            if chars.get(i + 1) == Some(&'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        if !ch.is_ascii_alphabetic() {
            push_literal(&mut out, ch);
            i += 1;
            continue;
        }

        let mut count = 1;
        while chars.get(i + count) == Some(&ch) {
            count += 1;
        }
        i += count;
        let translated = match (ch, count) {
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1) => "%-m",
            ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) => "%-d",
            ('d', _) => "%d",
            ('D', _) => "%j",
            ('H', 1) => "%-H",
            ('H', _) => "%H",
            ('h', 1) => "%-I",
            ('h', _) => "%I",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('S', _) => "%3f",
            ('a', _) => "%p",
            ('E', 1..=3) => "%a",
            ('E', _) => "%A",
            ('Z', _) => "%z",
            ('X', _) => "%:z",
            ('z', _) => "%Z",
            _ => {
                for _ in 0..count {
                    out.push(ch);
                }
                continue;
            }
        };
        out.push_str(translated);
    }
    out
}

fn push_literal(out: &mut String, ch: char) {
    if ch == '%' {
        out.push_str("%%");
    } else {
        out.push(ch);
    }
}

/// Parses `text` with a date pattern; date-only patterns yield midnight.
pub fn parse_datetime(text: &str, pattern: &str) -> Option<NaiveDateTime> {
    let format = to_chrono_format(pattern);
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, &format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, &format)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .or_else(|| {
            DateTime::parse_from_str(text, &format)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

/// Parses dates written without a pattern: epoch millis or ISO-8601.
pub fn parse_datetime_default(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(millis) = text.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc());
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(text, DEFAULT_DATE_FORMAT).ok())
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Formats a date; returns None when the pattern needs data a naive date lacks.
pub fn format_datetime(value: &NaiveDateTime, pattern: &str) -> Option<String> {
    let format = to_chrono_format(pattern);
    let mut out = String::new();
    write!(out, "{}", value.format(&format)).ok()?;
    Some(out)
}

pub fn format_default(value: &NaiveDateTime) -> String {
    value.format(DEFAULT_DATE_FORMAT).to_string()
}
