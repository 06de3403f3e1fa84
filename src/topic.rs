// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! `Topic` — a non-empty UTF-8 string identifying a publication channel.
//! Equality is bytewise; cloning is an `Arc` bump so a topic can be held by
//! the registry, every subscriber's reverse index, and every in-flight
//! `IndelUpdate` without copying the bytes.

use crate::error::PubSubError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(Arc<str>);

impl Topic {
    pub fn new(value: impl AsRef<str>) -> Result<Self, PubSubError> {
        let value = value.as_ref();
        if value.is_empty() {
            return Err(PubSubError::InvalidTopic);
        }
        Ok(Self(Arc::from(value)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Topic {
    type Err = PubSubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::new(s)
    }
}

impl TryFrom<String> for Topic {
    type Error = PubSubError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::new(value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0.to_string()
    }
}

impl Deref for Topic {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
