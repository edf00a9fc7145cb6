//! Amazon Resource Name parsing

use std::fmt;
use std::str::FromStr;

/// A parsed `arn:partition:service:region:account:resource`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    /// Everything after the account field; may itself contain `:` and `/`
    pub resource: String,
}

impl FromStr for Arn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(6, ':');

        if parts.next() != Some("arn") {
            return Err(format!("{} is not an ARN", s));
        }

        let mut field = |name: &str| {
            parts
                .next()
                .map(str::to_string)
                .ok_or_else(|| format!("{} is missing the {} field", s, name))
        };

        let partition = field("partition")?;
        let service = field("service")?;
        let region = field("region")?;
        let account_id = field("account")?;
        let resource = field("resource")?;

        if partition.is_empty() || service.is_empty() || resource.is_empty() {
            return Err(format!("{} is not a well-formed ARN", s));
        }

        Ok(Arn {
            partition,
            service,
            region,
            account_id,
            resource,
        })
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}
