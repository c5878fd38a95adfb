//! Picks how a freshly submitted job is followed by the client.
//!
//! Every client can follow a job by reloading its status page. Clients that
//! announce htmx support additionally get a fragment that listens on the
//! job's event stream and swaps the status card in place.

use serde::{Deserialize, Serialize};

pub fn status_page_url(job_id: &str) -> String {
    format!("/jobs/{job_id}")
}

pub fn card_url(job_id: &str) -> String {
    format!("/jobs/{job_id}/card")
}

pub fn events_url(job_id: &str) -> String {
    format!("/jobs/{job_id}/events")
}

/// Delivery the submitting form asked for. Absent means "whatever works best".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPreference {
    Pull,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCapability {
    PullOnly,
    Push,
}

impl ClientCapability {
    /// Push needs a client that runs htmx, push enabled on the server and no
    /// explicit request for pull.
    pub fn detect(
        is_htmx: bool,
        push_enabled: bool,
        preference: Option<DeliveryPreference>,
    ) -> Self {
        let wants_pull = preference == Some(DeliveryPreference::Pull);
        if is_htmx && push_enabled && !wants_pull {
            Self::Push
        } else {
            Self::PullOnly
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Delivery {
    Pull {
        location: String,
    },
    Push {
        job_id: String,
        events_url: String,
        status_url: String,
    },
}

pub fn choose_delivery(capability: ClientCapability, job_id: &str) -> Delivery {
    match capability {
        ClientCapability::PullOnly => Delivery::Pull {
            location: status_page_url(job_id),
        },
        ClientCapability::Push => Delivery::Push {
            job_id: job_id.to_string(),
            events_url: events_url(job_id),
            status_url: status_page_url(job_id),
        },
    }
}
