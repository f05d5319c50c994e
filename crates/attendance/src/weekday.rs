//! Weekday labels as they appear in schedules and user preferences.
//!
//! Schedules are authored in Portuguese ("Segunda", "Terça-feira") while some clients
//! send English names, so parsing accepts both.

use chrono::Weekday;

const NAMES_PT: [&str; 7] = [
    "Domingo",
    "Segunda-feira",
    "Terça-feira",
    "Quarta-feira",
    "Quinta-feira",
    "Sexta-feira",
    "Sábado",
];

/// Parse a weekday label (Portuguese full/short, with or without accents, or English).
pub fn parse_weekday(label: &str) -> Option<Weekday> {
    let lower = label.trim().to_lowercase();
    let key = lower.strip_suffix("-feira").unwrap_or(&lower);

    let day = match key {
        "domingo" | "dom" | "sunday" | "sun" => Weekday::Sun,
        "segunda" | "seg" | "monday" | "mon" => Weekday::Mon,
        "terça" | "terca" | "ter" | "tuesday" | "tue" => Weekday::Tue,
        "quarta" | "qua" | "wednesday" | "wed" => Weekday::Wed,
        "quinta" | "qui" | "thursday" | "thu" => Weekday::Thu,
        "sexta" | "sex" | "friday" | "fri" => Weekday::Fri,
        "sábado" | "sabado" | "sáb" | "sab" | "saturday" | "sat" => Weekday::Sat,
        _ => return None,
    };
    Some(day)
}

/// Full Portuguese name, e.g. `Weekday::Mon` -> "Segunda-feira".
pub fn portuguese_name(day: Weekday) -> &'static str {
    NAMES_PT[day.num_days_from_sunday() as usize]
}
