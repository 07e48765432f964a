use mailparse::MailAddr;

use crate::models::{RawEmail, UserProfile, Vendor};

/// Attributes emails to configured users and resolves their vendor accounts.
pub struct UserRouter {
    users: Vec<UserProfile>,
}

fn addresses(header: &str) -> Vec<String> {
    let Ok(list) = mailparse::addrparse(header) else {
        return Vec::new();
    };
    list.iter()
        .flat_map(|addr| match addr {
            MailAddr::Single(info) => vec![info.addr.to_lowercase()],
            MailAddr::Group(group) => group.addrs.iter().map(|a| a.addr.to_lowercase()).collect(),
        })
        .collect()
}

impl UserRouter {
    pub fn new(users: Vec<UserProfile>) -> Self {
        Self { users }
    }

    pub fn get(&self, user_id: &str) -> Option<&UserProfile> {
        self.users.iter().find(|u| u.user_id == user_id)
    }

    /// Recipient address, then sender address, then a display name anywhere in
    /// subject or body. First matching user wins.
    pub fn identify(&self, email: &RawEmail) -> Option<&UserProfile> {
        if let Some(to) = email.to.as_deref() {
            let to = addresses(to);
            if let Some(user) = self.by_address(&to) {
                return Some(user);
            }
        }
        let from = addresses(&email.from);
        if let Some(user) = self.by_address(&from) {
            return Some(user);
        }
        let haystack = format!("{} {}", email.subject, email.body).to_lowercase();
        self.users.iter().find(|u| {
            u.names
                .iter()
                .any(|n| !n.trim().is_empty() && haystack.contains(&n.to_lowercase()))
        })
    }

    fn by_address(&self, found: &[String]) -> Option<&UserProfile> {
        if found.is_empty() {
            return None;
        }
        self.users.iter().find(|u| {
            u.emails
                .iter()
                .any(|e| found.contains(&e.trim().to_lowercase()))
        })
    }

    pub fn resolve_account(&self, user_id: &str, vendor: Vendor) -> Option<&str> {
        let user = self.get(user_id)?;
        match vendor {
            Vendor::Amazon => user.amazon_account.as_deref(),
            Vendor::Venmo => user.venmo_account.as_deref(),
        }
    }

    /// Shared accounts only pass when one of the user's names shows up in the body.
    pub fn validate_recipient(&self, user_id: &str, body_text: &str) -> bool {
        let Some(user) = self.get(user_id) else {
            return false;
        };
        if !user.requires_recipient_validation {
            return true;
        }
        let body = body_text.to_lowercase();
        user.names
            .iter()
            .any(|n| !n.trim().is_empty() && body.contains(&n.to_lowercase()))
    }
}
