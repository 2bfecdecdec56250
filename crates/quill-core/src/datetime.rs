use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Days,
  Duration,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use tracing::{
  debug,
  info,
  warn
};

const TZ_ENV: &str = "QUILL_TIMEZONE";
const TZ_FILE_ENV: &str =
  "QUILL_TIME_CONFIG";
const TZ_FILE_NAME: &str =
  "quill-time.toml";

/// `quill-time.toml`: either a top-level `timezone` or a `[time]` table.
#[derive(Debug, Default, Deserialize)]
struct TimeFile {
  timezone: Option<String>,
  #[serde(default)]
  time:     TimeSection
}

#[derive(Debug, Default, Deserialize)]
struct TimeSection {
  timezone: Option<String>
}

/// The zone in which "today" and calendar days are reckoned. Resolved once
/// per process: `QUILL_TIMEZONE`, then the time file, then UTC.
pub fn project_timezone() -> &'static Tz
{
  static ZONE: OnceLock<Tz> =
    OnceLock::new();
  ZONE.get_or_init(|| {
    let from_env = std::env::var(TZ_ENV)
      .ok()
      .and_then(|raw| {
        named_zone(&raw, TZ_ENV)
      });
    from_env
      .or_else(zone_from_time_file)
      .unwrap_or(chrono_tz::UTC)
  })
}

fn zone_from_time_file() -> Option<Tz>
{
  let path = std::env::var(TZ_FILE_ENV)
    .ok()
    .map(|raw| raw.trim().to_string())
    .filter(|raw| !raw.is_empty())
    .map(PathBuf::from)
    .or_else(|| {
      std::env::current_dir()
        .ok()
        .map(|dir| dir.join(TZ_FILE_NAME))
    })?;

  match read_time_file(&path) {
    | Ok(Some(name)) => named_zone(
      &name,
      &path.display().to_string()
    ),
    | Ok(None) => None,
    | Err(err) => {
      warn!(file = %path.display(), error = %format!("{err:#}"), "ignoring time file");
      None
    }
  }
}

fn read_time_file(
  path: &Path
) -> anyhow::Result<Option<String>> {
  if !path.exists() {
    debug!(file = %path.display(), "no time file");
    return Ok(None);
  }

  let raw = fs::read_to_string(path)
    .with_context(|| {
      format!(
        "failed to read {}",
        path.display()
      )
    })?;
  let parsed: TimeFile =
    toml::from_str(&raw).with_context(
      || {
        format!(
          "failed to parse {}",
          path.display()
        )
      }
    )?;

  Ok(
    parsed
      .timezone
      .or(parsed.time.timezone)
  )
}

fn named_zone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let name = raw.trim();
  match name.parse::<Tz>() {
    | Ok(tz) => {
      info!(source, timezone = %name, "using project timezone");
      Some(tz)
    }
    | Err(err) => {
      warn!(source, timezone = %name, error = %err, "unknown timezone name");
      None
    }
  }
}

#[must_use]
pub fn to_project_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  dt.with_timezone(project_timezone())
    .date_naive()
}

#[must_use]
pub fn format_project_date(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(project_timezone())
    .format("%Y-%m-%d")
    .to_string()
}

#[must_use]
pub fn format_project_datetime(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(project_timezone())
    .format("%Y-%m-%d %H:%M")
    .to_string()
}

/// First instant of a local calendar day.
///
/// Zones that skip midnight on a DST change start the day at the first
/// local time that exists.
#[must_use]
pub fn start_of_local_day(
  date: NaiveDate
) -> DateTime<Utc> {
  let tz = project_timezone();
  for hour in 0..=3 {
    let Some(naive) =
      date.and_hms_opt(hour, 0, 0)
    else {
      continue;
    };
    if let Some(local) = tz
      .from_local_datetime(&naive)
      .earliest()
    {
      return local.with_timezone(&Utc);
    }
  }

  warn!(
    %date,
    "local midnight unresolvable; treating date as utc"
  );
  DateTime::<Utc>::from_naive_utc_and_offset(
    date.and_time(NaiveTime::MIN),
    Utc
  )
}

/// Start of the local day containing `now`.
#[must_use]
pub fn start_of_day(
  now: DateTime<Utc>
) -> DateTime<Utc> {
  start_of_local_day(to_project_date(
    now
  ))
}

/// Exclusive end of the local day containing `now` (the next local
/// midnight).
#[must_use]
pub fn end_of_day(
  now: DateTime<Utc>
) -> DateTime<Utc> {
  day_bounds(to_project_date(now)).1
}

/// `[start, end)` bounds of one local calendar day.
#[must_use]
pub fn day_bounds(
  date: NaiveDate
) -> (DateTime<Utc>, DateTime<Utc>) {
  let next = date
    .succ_opt()
    .unwrap_or(NaiveDate::MAX);
  (
    start_of_local_day(date),
    start_of_local_day(next)
  )
}

/// Last representable minute of the local day containing `now`, used as
/// the default deadline of new tasks.
#[must_use]
pub fn default_due(
  now: DateTime<Utc>
) -> DateTime<Utc> {
  end_of_day(now) - Duration::minutes(1)
}

const ACCEPTED_FORMS: &str =
  "accepted: now, today, eod, \
   tomorrow, yesterday, a weekday \
   (mon or monday), a clock time \
   (3:30pm or 15:30), +N/-N with \
   w/d/h/m, RFC3339, YYYY-MM-DD, \
   YYYY-MM-DD HH:MM, M/D/YYYY and \
   M/D/YYYY, h:mm am";

/// Parse a user-entered date or date-time relative to `now`.
///
/// Bare dates resolve to local midnight; clock times to their next
/// occurrence. Slash dates read `M/D/YYYY`, optionally followed by
/// `, h:mm am`.
#[tracing::instrument(skip(now))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  if token.is_empty() {
    return Err(anyhow!(
      "no date given"
    ));
  }
  let lower =
    token.to_ascii_lowercase();

  if let Some(instant) =
    named_day(&lower, now)
  {
    return Ok(instant);
  }
  if let Some(instant) =
    next_clock_time(token, now)
  {
    return instant;
  }
  if let Some(instant) =
    relative_offset(&lower, now)
  {
    return instant;
  }
  if let Some(instant) =
    absolute(token)
  {
    return instant;
  }

  Err(anyhow!(
    "cannot read '{input}' as a date"
  ))
  .context(ACCEPTED_FORMS)
}

fn named_day(
  lower: &str,
  now: DateTime<Utc>
) -> Option<DateTime<Utc>> {
  let today = to_project_date(now);
  let date = match lower {
    | "now" => return Some(now),
    | "eod" | "tonight" => {
      return Some(default_due(now));
    }
    | "today" => today,
    | "tomorrow" => today.succ_opt()?,
    | "yesterday" => today.pred_opt()?,
    | other => {
      let weekday =
        other.parse::<Weekday>().ok()?;
      following_weekday(today, weekday)
    }
  };
  Some(start_of_local_day(date))
}

/// The next `weekday` strictly after `from`.
fn following_weekday(
  from: NaiveDate,
  weekday: Weekday
) -> NaiveDate {
  let ahead =
    match weekday.days_since(
      from.weekday()
    ) {
      | 0 => 7,
      | n => n
    };
  from
    .checked_add_days(Days::new(
      u64::from(ahead)
    ))
    .unwrap_or(from)
}

fn clock_pattern() -> Option<&'static Regex>
{
  static PATTERN: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  PATTERN
    .get_or_init(|| {
      Regex::new(
        r"(?i)^(\d{1,2}):(\d{2})\s*([ap]m)?$"
      )
      .ok()
    })
    .as_ref()
}

fn relative_pattern()
-> Option<&'static Regex> {
  static PATTERN: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  PATTERN
    .get_or_init(|| {
      Regex::new(r"^([+-])(\d+)([wdhm])$")
        .ok()
    })
    .as_ref()
}

/// `h:mm am`, `h:mmpm` or 24-hour `HH:MM` as an hour and minute.
fn clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let caps = clock_pattern()?
    .captures(token.trim())?;
  let hour: u32 =
    caps.get(1)?.as_str().parse().ok()?;
  let minute: u32 =
    caps.get(2)?.as_str().parse().ok()?;
  if minute > 59 {
    return None;
  }

  let meridiem = caps
    .get(3)
    .map(|m| m.as_str().to_ascii_lowercase());
  let hour = match (meridiem.as_deref(), hour)
  {
    | (None, 0..=23) => hour,
    | (Some("am"), 12) => 0,
    | (Some("pm"), 12) => 12,
    | (Some("am"), 1..=11) => hour,
    | (Some("pm"), 1..=11) => hour + 12,
    | _ => return None
  };
  Some((hour, minute))
}

fn next_clock_time(
  token: &str,
  now: DateTime<Utc>
) -> Option<anyhow::Result<DateTime<Utc>>>
{
  let (hour, minute) = clock_time(token)?;
  let today = to_project_date(now);
  let upcoming = [
    Some(today),
    today.succ_opt()
  ]
  .into_iter()
  .flatten()
  .filter_map(|day| {
    day.and_hms_opt(hour, minute, 0)
  })
  .filter_map(|naive| {
    project_local(naive).ok()
  })
  .find(|instant| *instant > now);

  Some(upcoming.ok_or_else(|| {
    anyhow!(
      "{token} does not occur today or \
       tomorrow in the project timezone"
    )
  }))
}

fn relative_offset(
  lower: &str,
  now: DateTime<Utc>
) -> Option<anyhow::Result<DateTime<Utc>>>
{
  let caps =
    relative_pattern()?.captures(lower)?;
  let amount = caps.get(2)?.as_str();
  let Ok(amount) = amount.parse::<i64>()
  else {
    return Some(Err(anyhow!(
      "offset {amount} is too large"
    )));
  };

  let step = match caps.get(3)?.as_str() {
    | "w" => Duration::try_weeks(amount),
    | "d" => Duration::try_days(amount),
    | "h" => Duration::try_hours(amount),
    | _ => Duration::try_minutes(amount)
  };
  let shifted = step.and_then(|step| {
    if caps.get(1)?.as_str() == "-" {
      now.checked_sub_signed(step)
    } else {
      now.checked_add_signed(step)
    }
  });

  Some(shifted.ok_or_else(|| {
    anyhow!("offset {lower} is out of range")
  }))
}

fn absolute(
  token: &str
) -> Option<anyhow::Result<DateTime<Utc>>>
{
  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Some(Ok(
      dt.with_timezone(&Utc)
    ));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Some(Ok(start_of_local_day(
      date
    )));
  }

  let local = ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
    .iter()
    .find_map(|fmt| {
      NaiveDateTime::parse_from_str(
        token, fmt
      )
      .ok()
    });
  if let Some(naive) = local {
    return Some(project_local(naive));
  }

  slash_date(token)
}

/// `M/D/YYYY` with an optional `, h:mm am` time.
fn slash_date(
  token: &str
) -> Option<anyhow::Result<DateTime<Utc>>>
{
  let (date_part, time_part) = token
    .split_once(',')
    .map_or((token, None), |(d, t)| {
      (d.trim(), Some(t.trim()))
    });
  let date = NaiveDate::parse_from_str(
    date_part, "%m/%d/%Y"
  )
  .ok()?;

  let Some(time_part) = time_part else {
    return Some(Ok(start_of_local_day(
      date
    )));
  };

  Some(
    clock_time(time_part)
      .and_then(|(hour, minute)| {
        date.and_hms_opt(hour, minute, 0)
      })
      .ok_or_else(|| {
        anyhow!(
          "Time is not of the format \
           h:mm AM. Ex: 10:30 am"
        )
      })
      .and_then(project_local)
  )
}

fn project_local(
  naive: NaiveDateTime
) -> anyhow::Result<DateTime<Utc>> {
  project_timezone()
    .from_local_datetime(&naive)
    .earliest()
    .map(|local| local.with_timezone(&Utc))
    .ok_or_else(|| {
      anyhow!(
        "{naive} does not exist in the \
         project timezone"
      )
    })
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    TimeZone,
    Utc
  };

  use super::*;

  fn fixed_now() -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now")
  }

  fn local_hm(
    dt: DateTime<Utc>
  ) -> String {
    dt.with_timezone(project_timezone())
      .format("%Y-%m-%d %H:%M")
      .to_string()
  }

  #[test]
  fn weekday_is_strictly_ahead() {
    let now = fixed_now();
    let today = to_project_date(now);
    for name in ["monday", "Mon", "TUE"] {
      let target = to_project_date(
        parse_date_expr(name, now)
          .expect("weekday")
      );
      assert!(target > today);
      assert!(
        target - today
          <= Duration::days(7)
      );
    }

    let same = today.weekday();
    let next = following_weekday(
      today, same
    );
    assert_eq!(next - today, Duration::days(7));
  }

  #[test]
  fn clock_time_picks_next_occurrence()
  {
    let now = fixed_now();
    let afternoon =
      parse_date_expr("3:23pm", now)
        .expect("afternoon");
    assert!(afternoon > now);
    assert!(local_hm(afternoon).ends_with("15:23"));

    let morning =
      parse_date_expr("09:00", now)
        .expect("morning");
    assert!(morning > now);
    assert_eq!(
      to_project_date(morning),
      to_project_date(now)
        .succ_opt()
        .expect("tomorrow")
    );
  }

  #[test]
  fn clock_time_rejects_out_of_range()
  {
    assert_eq!(clock_time("13:00 pm"), None);
    assert_eq!(clock_time("0:30 am"), None);
    assert_eq!(clock_time("24:00"), None);
    assert_eq!(clock_time("12:00 am"), Some((0, 0)));
  }

  #[test]
  fn slash_date_with_and_without_time() {
    let now = fixed_now();
    let parsed = parse_date_expr(
      "7/26/2026, 10:30 am",
      now
    )
    .expect("slash date");
    assert_eq!(
      local_hm(parsed),
      "2026-07-26 10:30"
    );

    let bare =
      parse_date_expr("7/26/2026", now)
        .expect("bare slash date");
    assert_eq!(
      local_hm(bare),
      "2026-07-26 00:00"
    );

    let err = parse_date_expr(
      "7/26/2026, 25:99",
      now
    )
    .expect_err("bad time");
    assert!(
      format!("{err:#}")
        .contains("h:mm AM")
    );
  }

  #[test]
  fn relative_offsets_apply_to_now() {
    let now = fixed_now();
    assert_eq!(
      parse_date_expr("-1h", now)
        .expect("hours"),
      now - Duration::hours(1)
    );
    assert_eq!(
      parse_date_expr("+2w", now)
        .expect("weeks"),
      now + Duration::weeks(2)
    );
    assert!(
      parse_date_expr(
        "+99999999999999999999d",
        now
      )
      .is_err()
    );
  }

  #[test]
  fn rejects_garbage_and_empty() {
    let err = parse_date_expr(
      "3cshjaklfdhsa",
      fixed_now()
    )
    .expect_err("garbage");
    assert!(
      format!("{err:#}")
        .contains("accepted:")
    );
    assert!(
      parse_date_expr("  ", fixed_now())
        .is_err()
    );
  }

  #[test]
  fn day_helpers_bracket_now() {
    let now = fixed_now();
    let start = start_of_day(now);
    let end = end_of_day(now);
    assert!(start <= now && now < end);
    assert_eq!(
      day_bounds(to_project_date(now)),
      (start, end)
    );
    assert_eq!(
      default_due(now),
      end - Duration::minutes(1)
    );
  }

  #[test]
  fn time_file_accepts_either_layout() {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    let flat = dir.path().join("flat.toml");
    fs::write(
      &flat,
      "timezone = \"Europe/Paris\"\n"
    )
    .expect("write flat");
    let nested =
      dir.path().join("nested.toml");
    fs::write(
      &nested,
      "[time]\ntimezone = \"Asia/Tokyo\"\n"
    )
    .expect("write nested");

    assert_eq!(
      read_time_file(&flat)
        .expect("flat")
        .as_deref(),
      Some("Europe/Paris")
    );
    assert_eq!(
      read_time_file(&nested)
        .expect("nested")
        .as_deref(),
      Some("Asia/Tokyo")
    );
    assert_eq!(
      read_time_file(
        &dir.path().join("missing.toml")
      )
      .expect("missing"),
      None
    );
    assert!(
      named_zone("Mars/Olympus", "test")
        .is_none()
    );
  }
}
