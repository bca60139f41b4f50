/// Generates a new UUID string for use as an entity primary key.
#[must_use]
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Rounds a monetary value to 2 decimal places.
///
/// Settlement points (realized P&L, stop/take-profit levels) always round
/// through this so values compare cleanly after a database round trip.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rounds a price to 4 decimal places (quote midpoints, indicator values).
#[must_use]
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
