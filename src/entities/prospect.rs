// 🎯 Prospect Entity
//
// Links exactly one Customer to exactly one Address. Both links are held by
// external id, so a Prospect can be rebuilt from any source system's rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prospect {
    pub company: String,
    pub external_id: String,
    pub full_name: String,
    pub customer_external_id: String,
    pub address_external_id: String,
    pub created_at: DateTime<Utc>,
}

impl Prospect {
    pub fn new(
        company: &str,
        external_id: &str,
        full_name: &str,
        customer_external_id: &str,
        address_external_id: &str,
    ) -> Self {
        Prospect {
            company: company.to_string(),
            external_id: external_id.to_string(),
            full_name: full_name.trim().to_string(),
            customer_external_id: customer_external_id.to_string(),
            address_external_id: address_external_id.to_string(),
            created_at: Utc::now(),
        }
    }
}
