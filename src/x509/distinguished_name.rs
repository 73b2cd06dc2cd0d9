//! Certificate subject for signing requests

use serde::{Deserialize, Serialize};

/// Subject fields of a certificate request.
///
/// `dns` is not part of the distinguished name; it names the artifacts and the
/// completed directory and is substituted into the signing config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub common_name: String,
    pub email: String,
    pub dns: String,
    pub organization: String,
    pub city: String,
    pub state: String,
    pub country: String,
}

impl Subject {
    pub fn new(common_name: impl Into<String>, dns: impl Into<String>) -> Self {
        let common_name = common_name.into();
        Self {
            email: common_name.clone(),
            common_name,
            dns: dns.into(),
            organization: String::new(),
            city: String::new(),
            state: String::new(),
            country: String::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = org.into();
        self
    }

    pub fn with_locality(
        mut self,
        city: impl Into<String>,
        state: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        self.city = city.into();
        self.state = state.into();
        self.country = country.into();
        self
    }

    /// Endpoint requests whose email holds a mailbox are bound to the address,
    /// everything else is bound to the DNS name.
    pub fn is_email_bound(&self) -> bool {
        self.email.contains('@')
    }

    /// Render the `-subj` argument for the signing engine.
    ///
    /// Field order is fixed: emailAddress, C, ST, L, CN, O. Existing anchors
    /// were requested in this order and reordering changes the canonical
    /// encoding of the request.
    pub fn to_dn(&self) -> String {
        let fields = [
            ("emailAddress", &self.email),
            ("C", &self.country),
            ("ST", &self.state),
            ("L", &self.city),
            ("CN", &self.common_name),
            ("O", &self.organization),
        ];

        let mut dn = String::new();
        for (key, value) in fields {
            dn.push('/');
            dn.push_str(key);
            dn.push('=');
            dn.push_str(&escape_dn_value(value));
        }
        dn
    }
}

fn escape_dn_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '/' | '\\' | '+') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
