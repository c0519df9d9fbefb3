//! DateTime node - format, shift, diff and convert dates.

use async_trait::async_trait;
use chrono::{
    DateTime, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{Credentials, Node, NodeDefinition, NodeGroup, NodeOutput, PropertyDefinition};
use crate::error::{Error, Result};
use crate::expression::{numeric_value, stringify};

/// ISO 8601 with offset, the shape of every date this node emits.
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// DateTime node for date/time operations.
pub struct DateTimeNode;

impl DateTimeNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DateTimeNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DateTimeConfig {
    #[serde(default = "default_operation")]
    operation: String,

    /// Date to operate on; `now` means the current time
    #[serde(default)]
    date: Option<Value>,

    /// Output format in `Y-m-d H:i:s` notation
    #[serde(default)]
    format: Option<String>,

    #[serde(default)]
    amount: Option<Value>,

    #[serde(default)]
    unit: Option<String>,

    /// Second date for `diff` (defaults to now)
    #[serde(default)]
    compare_to: Option<Value>,

    #[serde(default)]
    from_timezone: Option<String>,

    #[serde(default)]
    to_timezone: Option<String>,
}

fn default_operation() -> String {
    "format".to_string()
}

#[async_trait]
impl Node for DateTimeNode {
    fn node_type(&self) -> &str {
        "datetime"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new(
            "Date & Time",
            self.node_type(),
            NodeGroup::Transform,
            "Format, shift, compare and convert dates",
        )
        .with_property(
            PropertyDefinition::new("operation", "Operation", "options")
                .with_options(&[
                    ("Format", "format"),
                    ("Add", "add"),
                    ("Subtract", "subtract"),
                    ("Difference", "diff"),
                    ("Convert Timezone", "timezone"),
                ])
                .with_default(json!("format")),
        )
        .with_property(PropertyDefinition::new("date", "Date", "string").with_default(json!("now")))
        .with_property(
            PropertyDefinition::new("format", "Format", "string").with_default(json!("Y-m-d H:i:s")),
        )
        .with_property(PropertyDefinition::new("amount", "Amount", "number").with_default(json!(1)))
        .with_property(
            PropertyDefinition::new("unit", "Unit", "options")
                .with_options(&[
                    ("Seconds", "seconds"),
                    ("Minutes", "minutes"),
                    ("Hours", "hours"),
                    ("Days", "days"),
                    ("Weeks", "weeks"),
                    ("Months", "months"),
                    ("Years", "years"),
                ])
                .with_default(json!("days")),
        )
        .with_property(PropertyDefinition::new("compareTo", "Compare To", "string"))
        .with_property(
            PropertyDefinition::new("fromTimezone", "From Timezone", "string")
                .with_default(json!("UTC")),
        )
        .with_property(
            PropertyDefinition::new("toTimezone", "To Timezone", "string").with_default(json!("UTC")),
        )
    }

    async fn execute(&self, _input: &Value, params: &Value, _: &Credentials) -> Result<NodeOutput> {
        let config: DateTimeConfig = serde_json::from_value(params.clone())
            .map_err(|e| Error::node(format!("Invalid datetime config: {}", e)))?;

        let date = config
            .date
            .as_ref()
            .map(stringify)
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| "now".to_string());

        let output = match config.operation.as_str() {
            "format" => {
                let dt = parse_date(&date, &Zone::utc())?;
                let format = config.format.as_deref().unwrap_or("Y-m-d H:i:s");
                json!({ "formatted": dt.format(&php_to_strftime(format)).to_string() })
            }
            "add" | "subtract" => {
                let dt = parse_date(&date, &Zone::utc())?;
                let mut amount = parse_amount(config.amount.as_ref())?;
                if config.operation == "subtract" {
                    amount = amount
                        .checked_neg()
                        .ok_or_else(|| Error::node("Amount is out of range"))?;
                }
                let unit = config.unit.as_deref().unwrap_or("days");
                let shifted = shift(dt, amount, unit)?;
                json!({ "result": shifted.format(ISO_FORMAT).to_string() })
            }
            "diff" => {
                let dt = parse_date(&date, &Zone::utc())?;
                let other = match config.compare_to.as_ref().map(stringify) {
                    Some(s) if !s.trim().is_empty() => parse_date(&s, &Zone::utc())?,
                    _ => Utc::now().fixed_offset(),
                };
                diff(dt, other)
            }
            "timezone" => {
                let from = Zone::parse(config.from_timezone.as_deref().unwrap_or("UTC"))?;
                let to = Zone::parse(config.to_timezone.as_deref().unwrap_or("UTC"))?;
                let dt = parse_date(&date, &from)?;
                json!({ "converted": to.convert(dt).format(ISO_FORMAT).to_string() })
            }
            _ => json!({ "formatted": date }),
        };

        Ok(NodeOutput::Data(output))
    }
}

/// A named IANA zone or a fixed offset.
enum Zone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl Zone {
    fn utc() -> Self {
        Zone::Named(Tz::UTC)
    }

    fn parse(name: &str) -> Result<Self> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("utc") || name == "Z" {
            return Ok(Self::utc());
        }
        if let Ok(tz) = name.parse::<Tz>() {
            return Ok(Zone::Named(tz));
        }
        if let Ok(offset) = name.parse::<FixedOffset>() {
            return Ok(Zone::Fixed(offset));
        }
        Err(Error::node(format!("Unknown timezone '{}'", name)))
    }

    fn localize(&self, naive: &NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self {
            Zone::Named(tz) => tz.from_local_datetime(naive).earliest().map(|dt| dt.fixed_offset()),
            Zone::Fixed(offset) => offset.from_local_datetime(naive).single(),
        }
    }

    fn convert(&self, dt: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        match self {
            Zone::Named(tz) => dt.with_timezone(tz).fixed_offset(),
            Zone::Fixed(offset) => dt.with_timezone(offset),
        }
    }
}

/// Parse `now`, RFC 3339, or a naive date/datetime interpreted in `zone`.
fn parse_date(s: &str, zone: &Zone) -> Result<DateTime<FixedOffset>> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("now") {
        return Ok(zone.convert(Utc::now().fixed_offset()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt);
    }

    let naive = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| Error::node(format!("Failed to parse date '{}'", s)))?;

    zone.localize(&naive)
        .ok_or_else(|| Error::node(format!("Date '{}' does not exist in the timezone", s)))
}

fn parse_amount(amount: Option<&Value>) -> Result<i64> {
    match amount {
        None | Some(Value::Null) => Ok(1),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(whole_amount))
            .ok_or_else(|| Error::node(format!("Invalid amount '{}'", n))),
        Some(other) => numeric_value(&stringify(other))
            .and_then(whole_amount)
            .ok_or_else(|| Error::node(format!("Invalid amount '{}'", stringify(other)))),
    }
}

fn whole_amount(f: f64) -> Option<i64> {
    (f.is_finite() && f.abs() < i64::MAX as f64).then_some(f as i64)
}

/// Move `dt` by `amount` units. Months and years follow the calendar.
fn shift(dt: DateTime<FixedOffset>, amount: i64, unit: &str) -> Result<DateTime<FixedOffset>> {
    let unit = unit.trim().to_ascii_lowercase();
    let unit = unit.strip_suffix('s').unwrap_or(&unit);

    let by = |delta: Option<Duration>| delta.and_then(|d| dt.checked_add_signed(d));
    let shifted = match unit {
        "second" => by(Duration::try_seconds(amount)),
        "minute" => by(Duration::try_minutes(amount)),
        "hour" => by(Duration::try_hours(amount)),
        "day" => by(Duration::try_days(amount)),
        "week" => by(Duration::try_weeks(amount)),
        "month" | "year" => {
            let months = if unit == "year" {
                amount.checked_mul(12)
            } else {
                Some(amount)
            }
            .ok_or_else(|| Error::node("Date overflow"))?;
            let magnitude = Months::new(
                u32::try_from(months.unsigned_abs()).map_err(|_| Error::node("Date overflow"))?,
            );
            if months >= 0 {
                dt.checked_add_months(magnitude)
            } else {
                dt.checked_sub_months(magnitude)
            }
        }
        other => return Err(Error::node(format!("Unknown time unit '{}'", other))),
    };

    shifted.ok_or_else(|| Error::node("Date overflow"))
}

/// Calendar difference between two dates, always non-negative.
fn diff(a: DateTime<FixedOffset>, b: DateTime<FixedOffset>) -> Value {
    let (start, end) = if a <= b { (a, b) } else { (b, a) };

    let mut months: u32 = 0;
    while start
        .checked_add_months(Months::new(months + 1))
        .is_some_and(|next| next <= end)
    {
        months += 1;
    }
    let anchor = start.checked_add_months(Months::new(months)).unwrap_or(start);
    let rest = end - anchor;

    json!({
        "years": months / 12,
        "months": months % 12,
        "days": rest.num_days(),
        "hours": rest.num_hours() % 24,
        "minutes": rest.num_minutes() % 60,
        "seconds": rest.num_seconds() % 60,
        "total_days": (end - start).num_days(),
    })
}

/// Translate a `Y-m-d H:i:s` style format into strftime.
///
/// A backslash escapes the next character.
fn php_to_strftime(format: &str) -> String {
    let mut out = String::with_capacity(format.len() * 2);
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        let mapped = match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    push_literal(&mut out, escaped);
                }
                continue;
            }
            'd' => "%d",
            'D' => "%a",
            'j' => "%-d",
            'l' => "%A",
            'N' => "%u",
            'w' => "%w",
            'z' => "%-j",
            'W' => "%V",
            'F' => "%B",
            'm' => "%m",
            'M' => "%b",
            'n' => "%-m",
            'y' => "%y",
            'Y' => "%Y",
            'a' => "%P",
            'A' => "%p",
            'g' => "%-I",
            'G' => "%-H",
            'h' => "%I",
            'H' => "%H",
            'i' => "%M",
            's' => "%S",
            'u' => "%6f",
            'v' => "%3f",
            'e' | 'T' => "%Z",
            'P' => "%:z",
            'O' => "%z",
            'U' => "%s",
            'c' => ISO_FORMAT,
            'r' => "%a, %d %b %Y %H:%M:%S %z",
            other => {
                push_literal(&mut out, other);
                continue;
            }
        };
        out.push_str(mapped);
    }
    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(params: Value) -> Value {
        DateTimeNode::new()
            .execute(&json!({}), &params, &Credentials::new())
            .await
            .unwrap()
            .payload()
            .clone()
    }

    #[test]
    fn test_php_format_translation() {
        assert_eq!(php_to_strftime("Y-m-d H:i:s"), "%Y-%m-%d %H:%M:%S");
        assert_eq!(php_to_strftime("D, j M"), "%a, %-d %b");
        assert_eq!(php_to_strftime("\\Y\\e\\a\\r: Y 100%"), "Year: %Y 100%%");
    }

    #[tokio::test]
    async fn test_format_default() {
        let out = run(json!({"date": "2024-01-15T10:30:00Z"})).await;
        assert_eq!(out, json!({"formatted": "2024-01-15 10:30:00"}));

        let out = run(json!({"date": "2024-01-15", "format": "d/m/Y"})).await;
        assert_eq!(out, json!({"formatted": "15/01/2024"}));
    }

    #[tokio::test]
    async fn test_add_and_subtract() {
        let out = run(json!({
            "operation": "add", "date": "2024-01-31T00:00:00Z", "amount": 1, "unit": "months"
        }))
        .await;
        assert_eq!(out, json!({"result": "2024-02-29T00:00:00+00:00"}));

        let out = run(json!({
            "operation": "subtract", "date": "2024-01-15T10:00:00Z", "amount": "3", "unit": "hours"
        }))
        .await;
        assert_eq!(out, json!({"result": "2024-01-15T07:00:00+00:00"}));
    }

    #[tokio::test]
    async fn test_diff() {
        let out = run(json!({
            "operation": "diff",
            "date": "2023-01-10T00:00:00Z",
            "compareTo": "2024-03-12T05:06:07Z"
        }))
        .await;
        assert_eq!(
            out,
            json!({
                "years": 1, "months": 2, "days": 2,
                "hours": 5, "minutes": 6, "seconds": 7,
                "total_days": 427
            })
        );
    }

    #[tokio::test]
    async fn test_timezone_conversion() {
        let out = run(json!({
            "operation": "timezone",
            "date": "2024-07-01 12:00:00",
            "fromTimezone": "UTC",
            "toTimezone": "Europe/Paris"
        }))
        .await;
        assert_eq!(out, json!({"converted": "2024-07-01T14:00:00+02:00"}));
    }

    #[tokio::test]
    async fn test_unknown_operation_echoes_date() {
        let out = run(json!({"operation": "wobble", "date": "tomorrow-ish"})).await;
        assert_eq!(out, json!({"formatted": "tomorrow-ish"}));
    }

    #[tokio::test]
    async fn test_unparseable_date_fails() {
        let err = DateTimeNode::new()
            .execute(&json!({}), &json!({"date": "not a date"}), &Credentials::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to parse date"));
    }

    #[tokio::test]
    async fn test_out_of_range_shift_is_a_node_error() {
        for params in [
            json!({"operation": "add", "date": "2024-01-01", "amount": 1e16, "unit": "seconds"}),
            json!({"operation": "add", "date": "2024-01-01", "amount": 1e18, "unit": "years"}),
            json!({"operation": "subtract", "date": "2024-01-01", "amount": 1e40, "unit": "days"}),
        ] {
            let err = DateTimeNode::new()
                .execute(&json!({}), &params, &Credentials::new())
                .await
                .unwrap_err();
            assert_eq!(err.code(), "NODE_EXECUTION_ERROR");
        }
    }
}
