//! Inbound email dispatch: decide what to do with a tracker notification.

use crate::IssueId;
use mail_parser::MessageParser;
use regex::Regex;
use std::sync::LazyLock;

/// Domains the tracker's mailing list pipeline sends from. Anything else is
/// treated as unsolicited and handed to the admin.
const ALLOWED_SENDER_DOMAINS: [&str; 4] = [
    "frost.tw",
    "aotoki.me",
    "nue.mailmanlists.eu",
    "ml.ruby-lang.org",
];

static ISSUE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://bugs\.ruby-lang\.org/issues/(\d+)").expect("hardcoded regex")
});

/// Where an inbound email should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailRoute {
    /// A tracker notification: feed the issue's debounce window.
    Summarize { issue_id: IssueId },
    /// Not actionable by the bot; the admin should see it.
    ForwardAdmin { admin_email: String },
    /// Drop silently.
    Reject,
}

#[derive(Debug, Clone)]
pub struct DispatchDecision {
    pub route: EmailRoute,
    /// Human-readable decision text, returned to the HTTP caller and logged.
    pub text: String,
}

/// Parses raw inbound mail and routes it.
pub struct EmailDispatcher {
    admin_email: String,
}

impl EmailDispatcher {
    pub fn new(admin_email: String) -> Self {
        Self { admin_email }
    }

    pub fn dispatch(&self, raw: &[u8]) -> DispatchDecision {
        let Some(message) = MessageParser::default().parse(raw) else {
            return DispatchDecision {
                route: EmailRoute::Reject,
                text: "Unparseable message".to_string(),
            };
        };

        let Some(sender) = message
            .from()
            .and_then(|from| from.first())
            .and_then(|addr| addr.address.as_deref())
        else {
            return DispatchDecision {
                route: EmailRoute::Reject,
                text: "Missing sender address".to_string(),
            };
        };

        if !sender_domain_allowed(sender) {
            tracing::warn!(sender = %sender, "unauthorized sender domain");
            return DispatchDecision {
                route: EmailRoute::ForwardAdmin {
                    admin_email: self.admin_email.clone(),
                },
                text: format!(
                    "Unauthorized sender domain, forwarding to {}",
                    self.admin_email
                ),
            };
        }

        let body = message.body_text(0).unwrap_or_default();
        match extract_issue_id(&body) {
            Some(issue_id) => DispatchDecision {
                route: EmailRoute::Summarize { issue_id },
                text: format!("Processing Ruby issue #{issue_id}"),
            },
            None => DispatchDecision {
                route: EmailRoute::ForwardAdmin {
                    admin_email: self.admin_email.clone(),
                },
                text: format!("No issue link found, forwarding to {}", self.admin_email),
            },
        }
    }
}

/// Exact allowlisted domain, or any subdomain of one. Case-insensitive.
fn sender_domain_allowed(address: &str) -> bool {
    let Some((_, domain)) = address.rsplit_once('@') else {
        return false;
    };
    let domain = domain.to_ascii_lowercase();
    ALLOWED_SENDER_DOMAINS
        .iter()
        .any(|allowed| domain == *allowed || domain.ends_with(&format!(".{allowed}")))
}

/// First tracker issue link in the body, if any.
fn extract_issue_id(body: &str) -> Option<IssueId> {
    let captures = ISSUE_LINK.captures(body)?;
    let id = captures.get(1)?.as_str().parse::<u64>().ok()?;
    Some(IssueId(id))
}
