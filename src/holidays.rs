//! Public holiday calendars for the countries stores operate in.
//!
//! Fixed-date and weekday-rule holidays are computed for any year. Lunar
//! holidays come from lookup tables covering 2000-2030; outside that range
//! they are omitted and a warning is logged once.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use log::warn;
use std::collections::{BTreeSet, HashSet};
use std::sync::Once;

pub const SUPPORTED_COUNTRIES: [&str; 17] = [
    "AU", "CA", "CN", "DE", "ES", "FR", "GB", "HK", "IN", "IT", "JP", "KR", "MY", "NL", "SG", "TW", "US",
];

const LUNAR_TABLE_FIRST_YEAR: i32 = 2000;
const LUNAR_TABLE_LAST_YEAR: i32 = 2030;
const LUNAR_TABLE_LEN: usize = (LUNAR_TABLE_LAST_YEAR - LUNAR_TABLE_FIRST_YEAR + 1) as usize;

static LUNAR_RANGE_WARNING: Once = Once::new();

// (month, day) per year starting at LUNAR_TABLE_FIRST_YEAR, five years a row.
const LUNAR_NEW_YEAR: [(u32, u32); LUNAR_TABLE_LEN] = [
    (2, 5), (1, 24), (2, 12), (2, 1), (1, 22),
    (2, 9), (1, 29), (2, 18), (2, 7), (1, 26),
    (2, 14), (2, 3), (1, 23), (2, 10), (1, 31),
    (2, 19), (2, 8), (1, 28), (2, 16), (2, 5),
    (1, 25), (2, 12), (2, 1), (1, 22), (2, 10),
    (1, 29), (2, 17), (2, 6), (1, 26), (2, 13),
    (2, 3),
];
const QINGMING: [(u32, u32); LUNAR_TABLE_LEN] = [
    (4, 4), (4, 5), (4, 5), (4, 5), (4, 4),
    (4, 5), (4, 5), (4, 5), (4, 4), (4, 4),
    (4, 5), (4, 5), (4, 4), (4, 4), (4, 5),
    (4, 5), (4, 4), (4, 4), (4, 5), (4, 5),
    (4, 4), (4, 4), (4, 5), (4, 5), (4, 4),
    (4, 4), (4, 5), (4, 5), (4, 4), (4, 4),
    (4, 5),
];
const DRAGON_BOAT: [(u32, u32); LUNAR_TABLE_LEN] = [
    (6, 6), (6, 25), (6, 15), (6, 4), (6, 22),
    (6, 11), (5, 31), (6, 19), (6, 8), (5, 28),
    (6, 16), (6, 6), (6, 23), (6, 12), (6, 2),
    (6, 20), (6, 9), (5, 30), (6, 18), (6, 7),
    (6, 25), (6, 14), (6, 3), (6, 22), (6, 10),
    (5, 31), (6, 19), (6, 9), (5, 28), (6, 16),
    (6, 5),
];
const MID_AUTUMN: [(u32, u32); LUNAR_TABLE_LEN] = [
    (9, 12), (10, 1), (9, 21), (9, 11), (9, 28),
    (9, 18), (10, 6), (9, 25), (9, 14), (10, 3),
    (9, 22), (9, 12), (9, 30), (9, 19), (9, 8),
    (9, 27), (9, 15), (10, 4), (9, 24), (9, 13),
    (10, 1), (9, 21), (9, 10), (9, 29), (9, 17),
    (10, 6), (9, 25), (9, 15), (10, 3), (9, 22),
    (9, 12),
];

pub fn is_supported_country(country_code: &str) -> bool {
    let code = country_code.trim().to_ascii_uppercase();
    SUPPORTED_COUNTRIES.contains(&code.as_str())
}

/// Holiday dates for one country and year, or `None` if the country is unknown.
pub fn holidays_for_year(country_code: &str, year: i32) -> Option<Vec<NaiveDate>> {
    let mut dates = match country_code.trim().to_ascii_uppercase().as_str() {
        "AU" => australia(year),
        "CA" => canada(year),
        "CN" => china(year),
        "DE" => germany(year),
        "ES" => spain(year),
        "FR" => france(year),
        "GB" => great_britain(year),
        "HK" => hong_kong(year),
        "IN" => india(year),
        "IT" => italy(year),
        "JP" => japan(year),
        "KR" => south_korea(year),
        "MY" => malaysia(year),
        "NL" => netherlands(year),
        "SG" => singapore(year),
        "TW" => taiwan(year),
        "US" => united_states(year),
        _ => return None,
    };
    dates.sort();
    dates.dedup();
    Some(dates)
}

#[derive(Debug, Clone)]
pub struct HolidayCalendar {
    country_code: String,
    dates: HashSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn new<I>(country_code: &str, years: I) -> Option<Self>
    where
        I: IntoIterator<Item = i32>,
    {
        let code = country_code.trim().to_ascii_uppercase();
        if !is_supported_country(&code) {
            return None;
        }
        let mut dates = HashSet::new();
        for year in years {
            if let Some(year_dates) = holidays_for_year(&code, year) {
                dates.extend(year_dates);
            }
        }
        Some(Self {
            country_code: code,
            dates,
        })
    }

    /// A calendar with no holidays, used when holiday effects are disabled.
    pub fn empty() -> Self {
        Self {
            country_code: String::new(),
            dates: HashSet::new(),
        }
    }

    /// Calendar for `country_code`, or an empty calendar when the code is
    /// not supported so training proceeds without holiday effects.
    pub fn resolve<I>(country_code: &str, years: I) -> Self
    where
        I: IntoIterator<Item = i32>,
    {
        Self::new(country_code, years).unwrap_or_else(|| {
            warn!(
                "No holiday calendar for country '{}'; training without holidays",
                country_code
            );
            Self::empty()
        })
    }

    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Configured years plus every year touched by `[first, last]`.
pub fn calendar_years(configured: &[i32], first: NaiveDate, last: NaiveDate) -> Vec<i32> {
    let mut years: BTreeSet<i32> = configured.iter().copied().collect();
    let (low, high) = if first <= last {
        (first.year(), last.year())
    } else {
        (last.year(), first.year())
    };
    years.extend(low..=high);
    years.into_iter().collect()
}

fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

fn lunar(table: &[(u32, u32)], year: i32) -> Option<NaiveDate> {
    let entry = usize::try_from(year - LUNAR_TABLE_FIRST_YEAR)
        .ok()
        .and_then(|index| table.get(index));
    let Some((month, day)) = entry else {
        LUNAR_RANGE_WARNING.call_once(|| {
            warn!(
                "Lunar holidays are only known for {}-{}; omitting them for {}",
                LUNAR_TABLE_FIRST_YEAR, LUNAR_TABLE_LAST_YEAR, year
            );
        });
        return None;
    };
    ymd(year, *month, *day)
}

fn fixed_dates(year: i32, days: &[(u32, u32)]) -> Vec<NaiveDate> {
    days.iter().filter_map(|(month, day)| ymd(year, *month, *day)).collect()
}

/// Dates at the given day offsets from Easter Sunday.
fn easter_offsets(year: i32, offsets: &[i64]) -> Vec<NaiveDate> {
    easter_sunday(year)
        .map(|easter| offsets.iter().map(|offset| easter + Duration::days(*offset)).collect())
        .unwrap_or_default()
}

/// Dates at the given day offsets from a lunar table entry.
fn lunar_span(table: &[(u32, u32)], year: i32, offsets: &[i64]) -> Vec<NaiveDate> {
    lunar(table, year)
        .map(|base| offsets.iter().map(|offset| base + Duration::days(*offset)).collect())
        .unwrap_or_default()
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        ymd(year + 1, 1, 1)?
    } else {
        ymd(year, month + 1, 1)?
    };
    let mut date = first_of_next - Duration::days(1);
    while date.weekday() != weekday {
        date -= Duration::days(1);
    }
    Some(date)
}

/// Gregorian Easter Sunday (anonymous algorithm).
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = ((h + l - 7 * m + 114) % 31) + 1;
    ymd(year, month as u32, day as u32)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Adds the next free weekday for every weekend holiday in `originals`.
fn add_substitute_days(dates: &mut Vec<NaiveDate>, originals: &[NaiveDate]) {
    for original in originals {
        if !is_weekend(*original) {
            continue;
        }
        let mut candidate = *original + Duration::days(1);
        while is_weekend(candidate) || dates.contains(&candidate) {
            candidate += Duration::days(1);
        }
        dates.push(candidate);
    }
}

fn china(year: i32) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = [ymd(year, 1, 1), ymd(year, 5, 1)]
        .into_iter()
        .flatten()
        .collect();
    if let Some(new_year) = lunar(&LUNAR_NEW_YEAR, year) {
        dates.extend((0..3).map(|offset| new_year + Duration::days(offset)));
    }
    dates.extend(
        [
            lunar(&QINGMING, year),
            lunar(&DRAGON_BOAT, year),
            lunar(&MID_AUTUMN, year),
        ]
        .into_iter()
        .flatten(),
    );
    if let Some(national_day) = ymd(year, 10, 1) {
        dates.extend((0..3).map(|offset| national_day + Duration::days(offset)));
    }
    dates
}

fn singapore(year: i32) -> Vec<NaiveDate> {
    let mut originals: Vec<NaiveDate> = [ymd(year, 1, 1), ymd(year, 5, 1), ymd(year, 8, 9), ymd(year, 12, 25)]
        .into_iter()
        .flatten()
        .collect();
    if let Some(new_year) = lunar(&LUNAR_NEW_YEAR, year) {
        originals.push(new_year);
        originals.push(new_year + Duration::days(1));
    }
    if let Some(easter) = easter_sunday(year) {
        originals.push(easter - Duration::days(2));
    }
    let mut dates = originals.clone();
    add_substitute_days(&mut dates, &originals);
    dates
}

fn malaysia(year: i32) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = [
        ymd(year, 5, 1),
        nth_weekday(year, 6, Weekday::Mon, 1),
        ymd(year, 8, 31),
        ymd(year, 9, 16),
        ymd(year, 12, 25),
    ]
    .into_iter()
    .flatten()
    .collect();
    if let Some(new_year) = lunar(&LUNAR_NEW_YEAR, year) {
        dates.push(new_year);
        dates.push(new_year + Duration::days(1));
    }
    dates
}

fn great_britain(year: i32) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = Vec::new();
    if let Some(easter) = easter_sunday(year) {
        dates.push(easter - Duration::days(2));
        dates.push(easter + Duration::days(1));
    }
    dates.extend(
        [
            nth_weekday(year, 5, Weekday::Mon, 1),
            last_weekday(year, 5, Weekday::Mon),
            last_weekday(year, 8, Weekday::Mon),
        ]
        .into_iter()
        .flatten(),
    );
    let fixed: Vec<NaiveDate> = [ymd(year, 1, 1), ymd(year, 12, 25), ymd(year, 12, 26)]
        .into_iter()
        .flatten()
        .collect();
    dates.extend(fixed.iter().copied());
    add_substitute_days(&mut dates, &fixed);
    dates
}

fn united_states(year: i32) -> Vec<NaiveDate> {
    let mut fixed = vec![ymd(year, 1, 1), ymd(year, 7, 4), ymd(year, 11, 11), ymd(year, 12, 25)];
    if year >= 2021 {
        fixed.push(ymd(year, 6, 19));
    }
    let mut dates: Vec<NaiveDate> = Vec::new();
    for date in fixed.into_iter().flatten() {
        dates.push(date);
        match date.weekday() {
            Weekday::Sat => dates.push(date - Duration::days(1)),
            Weekday::Sun => dates.push(date + Duration::days(1)),
            _ => {}
        }
    }
    dates.extend(
        [
            nth_weekday(year, 1, Weekday::Mon, 3),
            nth_weekday(year, 2, Weekday::Mon, 3),
            last_weekday(year, 5, Weekday::Mon),
            nth_weekday(year, 9, Weekday::Mon, 1),
            nth_weekday(year, 10, Weekday::Mon, 2),
            nth_weekday(year, 11, Weekday::Thu, 4),
        ]
        .into_iter()
        .flatten(),
    );
    dates
}

fn germany(year: i32) -> Vec<NaiveDate> {
    let mut dates = fixed_dates(year, &[(1, 1), (5, 1), (10, 3), (12, 25), (12, 26)]);
    dates.extend(easter_offsets(year, &[-2, 1, 39, 50]));
    dates
}

fn france(year: i32) -> Vec<NaiveDate> {
    let mut dates = fixed_dates(
        year,
        &[(1, 1), (5, 1), (5, 8), (7, 14), (8, 15), (11, 1), (11, 11), (12, 25)],
    );
    dates.extend(easter_offsets(year, &[1, 39, 50]));
    dates
}

fn italy(year: i32) -> Vec<NaiveDate> {
    let mut dates = fixed_dates(
        year,
        &[(1, 1), (1, 6), (4, 25), (5, 1), (6, 2), (8, 15), (11, 1), (12, 8), (12, 25), (12, 26)],
    );
    dates.extend(easter_offsets(year, &[1]));
    dates
}

fn spain(year: i32) -> Vec<NaiveDate> {
    let mut dates = fixed_dates(
        year,
        &[(1, 1), (1, 6), (5, 1), (8, 15), (10, 12), (11, 1), (12, 6), (12, 8), (12, 25)],
    );
    dates.extend(easter_offsets(year, &[-2]));
    dates
}

fn netherlands(year: i32) -> Vec<NaiveDate> {
    let mut dates = fixed_dates(year, &[(1, 1), (5, 5), (12, 25), (12, 26)]);
    dates.extend(easter_offsets(year, &[-2, 1, 39, 50]));
    let royal = if year >= 2014 { ymd(year, 4, 27) } else { ymd(year, 4, 30) };
    if let Some(royal) = royal {
        dates.push(if royal.weekday() == Weekday::Sun { royal - Duration::days(1) } else { royal });
    }
    dates
}

fn australia(year: i32) -> Vec<NaiveDate> {
    let fixed = fixed_dates(year, &[(1, 1), (1, 26), (12, 25), (12, 26)]);
    let mut dates = fixed.clone();
    add_substitute_days(&mut dates, &fixed);
    dates.extend(fixed_dates(year, &[(4, 25)]));
    dates.extend(easter_offsets(year, &[-2, -1, 1]));
    dates.extend(nth_weekday(year, 6, Weekday::Mon, 2));
    dates
}

fn canada(year: i32) -> Vec<NaiveDate> {
    let mut dates = fixed_dates(year, &[(1, 1), (7, 1), (11, 11), (12, 25), (12, 26)]);
    dates.extend(easter_offsets(year, &[-2]));
    // Victoria Day: the Monday before May 25.
    if let Some(may_24) = ymd(year, 5, 24) {
        let back = i64::from(may_24.weekday().num_days_from_monday());
        dates.push(may_24 - Duration::days(back));
    }
    dates.extend(
        [nth_weekday(year, 9, Weekday::Mon, 1), nth_weekday(year, 10, Weekday::Mon, 2)]
            .into_iter()
            .flatten(),
    );
    dates
}

fn india(year: i32) -> Vec<NaiveDate> {
    fixed_dates(year, &[(1, 26), (8, 15), (10, 2)])
}

/// Equinox day numbers from the usual approximation, valid 1980-2099.
fn japan_equinoxes(year: i32) -> Vec<NaiveDate> {
    let offset = f64::from(year - 1980);
    let leap_shift = f64::from((year - 1980).div_euclid(4));
    let spring = (20.8431 + 0.242194 * offset - leap_shift).floor() as u32;
    let autumn = (23.2488 + 0.242194 * offset - leap_shift).floor() as u32;
    [ymd(year, 3, spring), ymd(year, 9, autumn)].into_iter().flatten().collect()
}

fn japan(year: i32) -> Vec<NaiveDate> {
    let mut dates = fixed_dates(year, &[(1, 1), (2, 11), (4, 29), (5, 3), (5, 4), (5, 5), (11, 3), (11, 23)]);
    if year >= 2020 {
        dates.extend(ymd(year, 2, 23));
    } else {
        dates.extend(ymd(year, 12, 23));
    }
    if year >= 2016 {
        dates.extend(ymd(year, 8, 11));
    }
    dates.extend(japan_equinoxes(year));
    dates.extend(
        [
            nth_weekday(year, 1, Weekday::Mon, 2),
            nth_weekday(year, 7, Weekday::Mon, 3),
            nth_weekday(year, 9, Weekday::Mon, 3),
            nth_weekday(year, 10, Weekday::Mon, 2),
        ]
        .into_iter()
        .flatten(),
    );
    // A holiday on Sunday moves to the next day that is not already a holiday.
    let sundays: Vec<NaiveDate> = dates.iter().copied().filter(|date| date.weekday() == Weekday::Sun).collect();
    for sunday in sundays {
        let mut candidate = sunday + Duration::days(1);
        while dates.contains(&candidate) {
            candidate += Duration::days(1);
        }
        dates.push(candidate);
    }
    dates
}

fn south_korea(year: i32) -> Vec<NaiveDate> {
    let mut dates = fixed_dates(
        year,
        &[(1, 1), (3, 1), (5, 5), (6, 6), (8, 15), (10, 3), (10, 9), (12, 25)],
    );
    dates.extend(lunar_span(&LUNAR_NEW_YEAR, year, &[-1, 0, 1]));
    dates.extend(lunar_span(&MID_AUTUMN, year, &[-1, 0, 1]));
    dates
}

fn hong_kong(year: i32) -> Vec<NaiveDate> {
    let mut dates = fixed_dates(year, &[(1, 1), (5, 1), (7, 1), (10, 1), (12, 25), (12, 26)]);
    dates.extend(easter_offsets(year, &[-2, -1, 1]));
    dates.extend(lunar_span(&LUNAR_NEW_YEAR, year, &[0, 1, 2]));
    dates.extend(lunar_span(&QINGMING, year, &[0]));
    dates.extend(lunar_span(&DRAGON_BOAT, year, &[0]));
    dates.extend(lunar_span(&MID_AUTUMN, year, &[1]));
    dates
}

fn taiwan(year: i32) -> Vec<NaiveDate> {
    let mut dates = fixed_dates(year, &[(1, 1), (2, 28), (4, 4), (10, 10)]);
    dates.extend(lunar_span(&LUNAR_NEW_YEAR, year, &[-1, 0, 1, 2]));
    dates.extend(lunar_span(&QINGMING, year, &[0]));
    dates.extend(lunar_span(&DRAGON_BOAT, year, &[0]));
    dates.extend(lunar_span(&MID_AUTUMN, year, &[0]));
    dates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn easter_matches_known_dates() {
        assert_eq!(easter_sunday(2024), Some(date(2024, 3, 31)));
        assert_eq!(easter_sunday(2025), Some(date(2025, 4, 20)));
    }

    #[test]
    fn china_includes_spring_festival_and_national_day() {
        let calendar = HolidayCalendar::new("cn", [2025]).unwrap();
        assert!(calendar.is_holiday(date(2025, 1, 29)));
        assert!(calendar.is_holiday(date(2025, 1, 31)));
        assert!(calendar.is_holiday(date(2025, 10, 3)));
        assert!(!calendar.is_holiday(date(2025, 10, 8)));
        assert_eq!(calendar.country_code(), "CN");
    }

    #[test]
    fn us_rules_and_observed_days() {
        let calendar = HolidayCalendar::new("US", [2024, 2026]).unwrap();
        assert!(calendar.is_holiday(date(2024, 11, 28)));
        assert!(calendar.is_holiday(date(2024, 5, 27)));
        // July 4th 2026 is a Saturday, observed Friday.
        assert!(calendar.is_holiday(date(2026, 7, 3)));
    }

    #[test]
    fn gb_boxing_day_substitute() {
        // Christmas 2021 fell on Saturday, Boxing Day on Sunday.
        let dates = holidays_for_year("GB", 2021).unwrap();
        assert!(dates.contains(&date(2021, 12, 27)));
        assert!(dates.contains(&date(2021, 12, 28)));
    }

    #[test]
    fn unsupported_country_resolves_to_an_empty_calendar() {
        assert!(!is_supported_country("ZZ"));
        assert!(HolidayCalendar::new("ZZ", [2024]).is_none());
        let calendar = HolidayCalendar::resolve("ZZ", vec![2024]);
        assert!(calendar.is_empty());
        assert!(!calendar.is_holiday(date(2024, 10, 1)));
        assert!(!calendar.is_holiday(date(2024, 2, 10)));
    }

    #[test]
    fn germany_has_christmas_and_no_spring_festival() {
        assert!(is_supported_country("de"));
        let calendar = HolidayCalendar::resolve("DE", vec![2024]);
        assert_eq!(calendar.country_code(), "DE");
        assert!(calendar.is_holiday(date(2024, 12, 25)));
        assert!(calendar.is_holiday(date(2024, 10, 3)));
        // Easter Monday and Whit Monday.
        assert!(calendar.is_holiday(date(2024, 4, 1)));
        assert!(calendar.is_holiday(date(2024, 5, 20)));
        assert!(!calendar.is_holiday(date(2024, 2, 10)));
        assert!(!calendar.is_holiday(date(2024, 10, 1)));
    }

    #[test]
    fn every_supported_country_has_holidays() {
        for code in SUPPORTED_COUNTRIES {
            let dates = holidays_for_year(code, 2025).unwrap();
            assert!(dates.len() >= 3, "{} has {} holidays", code, dates.len());
            assert!(dates.iter().all(|day| day.year() == 2025), "{}", code);
        }
    }

    #[test]
    fn japan_equinox_and_sunday_substitute() {
        let dates = holidays_for_year("JP", 2024).unwrap();
        assert!(dates.contains(&date(2024, 3, 20)));
        // Autumnal equinox 2024 fell on Sunday.
        assert!(dates.contains(&date(2024, 9, 22)));
        assert!(dates.contains(&date(2024, 9, 23)));
    }

    #[test]
    fn canada_victoria_day_is_the_monday_before_may_25() {
        let dates = holidays_for_year("CA", 2024).unwrap();
        assert!(dates.contains(&date(2024, 5, 20)));
        let dates = holidays_for_year("CA", 2021).unwrap();
        assert!(dates.contains(&date(2021, 5, 24)));
    }

    #[test]
    fn calendar_years_cover_data_range() {
        let years = calendar_years(&[2024], date(2022, 6, 1), date(2023, 2, 1));
        assert_eq!(years, vec![2022, 2023, 2024]);
    }

    #[test]
    fn lunar_years_outside_table_keep_fixed_holidays() {
        let dates = holidays_for_year("CN", 1990).unwrap();
        assert_eq!(
            dates,
            vec![date(1990, 1, 1), date(1990, 5, 1), date(1990, 10, 1), date(1990, 10, 2), date(1990, 10, 3)]
        );
        let later = holidays_for_year("CN", 2035).unwrap();
        assert_eq!(later.len(), 5);
    }

    #[test]
    fn lunar_table_covers_earlier_years() {
        let calendar = HolidayCalendar::new("CN", [2019]).unwrap();
        assert!(calendar.is_holiday(date(2019, 2, 5)));
        assert!(calendar.is_holiday(date(2019, 2, 7)));
        assert!(calendar.is_holiday(date(2019, 4, 5)));
        assert!(calendar.is_holiday(date(2019, 6, 7)));
        assert!(calendar.is_holiday(date(2019, 9, 13)));
        let sg = holidays_for_year("SG", 2010).unwrap();
        assert!(sg.contains(&date(2010, 2, 14)));
    }
}
