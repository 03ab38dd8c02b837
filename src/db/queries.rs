pub const INSERT_LOCATION_SAMPLE: &str = r#"
INSERT INTO location_tracking (booking_id, latitude, longitude, speed, heading, timestamp, status)
VALUES ($1, $2::numeric(10,7), $3::numeric(10,7), $4::numeric, $5::numeric, $6, $7);
"#;

// Only moves forward in time so overlapping sends cannot regress the pointer.
pub const UPDATE_BOOKING_POINTER: &str = r#"
UPDATE bookings
SET last_known_latitude = $2::numeric(10,7),
    last_known_longitude = $3::numeric(10,7),
    last_location_update = $4
WHERE id = $1
  AND (last_location_update IS NULL OR last_location_update <= $4);
"#;

pub const SELECT_BOOKING_LOCATION: &str = r#"
SELECT id AS booking_id,
       last_known_latitude::float8 AS last_known_latitude,
       last_known_longitude::float8 AS last_known_longitude,
       last_location_update,
       estimated_arrival_time
FROM bookings
WHERE id = $1;
"#;
