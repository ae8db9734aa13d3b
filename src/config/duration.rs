/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Human readable durations such as `100ms`, `5s` or `1m30s`. Used as a serde `with` module for
//! every duration in the config file.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Parses a duration made of one or more `<integer><unit>` parts. Units are `ms`, `s`, `m` and
/// `h`.
pub fn parse(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(anyhow!("Expected a number in duration '{}'", s));
        }
        let (value, tail) = rest.split_at(digits);
        let value = value
            .parse::<u64>()
            .context(format!("Invalid numeric value in duration '{}'", s))?;

        let unit_len = tail
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .count();
        let (unit, tail) = tail.split_at(unit_len);
        let too_large = || anyhow!("Duration '{}' is too large", s);
        let part = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(too_large)?),
            "h" => Duration::from_secs(value.checked_mul(60 * 60).ok_or_else(too_large)?),
            "" => return Err(anyhow!("Missing unit in duration '{}'", s)),
            _ => {
                return Err(anyhow!(
                    "Unknown duration unit '{}' in '{}'. Use 'ms', 's', 'm' or 'h'.",
                    unit,
                    s
                ))
            }
        };

        total = total.checked_add(part).ok_or_else(too_large)?;
        rest = tail;
    }

    Ok(total)
}

/// Formats a duration using the largest units that represent it exactly.
pub fn format(duration: &Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }

    let hours = millis / 3_600_000;
    let mins = (millis / 60_000) % 60;
    let secs = (millis / 1000) % 60;
    let ms = millis % 1000;

    let mut out = String::new();
    for (value, unit) in [(hours, "h"), (mins, "m"), (secs, "s"), (ms, "ms")] {
        if value > 0 {
            out.push_str(&format!("{}{}", value, unit));
        }
    }
    out
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(serde::de::Error::custom)
}
