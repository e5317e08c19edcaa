//! Periodic status report

use crate::clock::format_status_time;
use crate::config::{Location, Profile};
use crate::stats::StatsSnapshot;
use chrono::{DateTime, Utc};
use onechan_shared::status::{
    render_status, FixedDecimal, RenderedStatus, StatusFields, COORDINATE_PLACES,
    STATUS_PAYLOAD_CAPACITY,
};
use tracing::{debug, warn};

/// Renders the `{"stat":{...}}` payload
///
/// Coordinates are converted to fixed-point once, here, so rendering never
/// formats a float.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    latitude: FixedDecimal,
    longitude: FixedDecimal,
    altitude: i32,
    profile: Profile,
    capacity: usize,
}

impl StatusReporter {
    pub fn new(location: &Location, profile: Profile) -> Self {
        Self::with_capacity(location, profile, STATUS_PAYLOAD_CAPACITY)
    }

    pub fn with_capacity(location: &Location, profile: Profile, capacity: usize) -> Self {
        Self {
            latitude: FixedDecimal::from_f64(location.latitude, COORDINATE_PLACES),
            longitude: FixedDecimal::from_f64(location.longitude, COORDINATE_PLACES),
            altitude: location.altitude,
            profile,
            capacity,
        }
    }

    pub fn build_status(&self, now: &DateTime<Utc>, stats: &StatsSnapshot) -> RenderedStatus {
        let time = format_status_time(now);
        let fields = StatusFields {
            time: &time,
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            rx_received: stats.rx_received,
            rx_valid: stats.rx_valid,
            forwarded: stats.forwarded,
            ack_ratio: FixedDecimal::ratio_percent(stats.push_acked, stats.push_sent),
            downlink_received: stats.downlink_received,
            downlink_transmitted: stats.downlink_transmitted,
            platform: &self.profile.platform,
            email: &self.profile.email,
            description: &self.profile.description,
        };

        let rendered = render_status(&fields, self.capacity);
        if rendered.truncated {
            warn!(
                "[STATUS] Report truncated to {} bytes (capacity {})",
                rendered.payload.len(),
                self.capacity
            );
        } else {
            debug!("[STATUS] {}", String::from_utf8_lossy(&rendered.payload));
        }
        rendered
    }
}
