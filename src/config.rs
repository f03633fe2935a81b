// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Result};
use std::env;

use crate::constants;

/// Controller configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespaces to reconcile; `None` means all namespaces
    pub namespace_filter: Option<Vec<String>>,
    /// When true, only volumes backed by a PersistentVolumeClaim are annotated
    pub pvcs_only: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(
            env::var(constants::env::NS_FILTER).ok(),
            env::var(constants::env::PVCS_ONLY).ok(),
        )
    }

    fn from_vars(ns_filter: Option<String>, pvcs_only: Option<String>) -> Result<Self> {
        let namespace_filter = match ns_filter.as_deref() {
            None | Some("") => None,
            Some(raw) => {
                let namespaces: Vec<String> =
                    raw.split(',').map(|ns| ns.trim().to_string()).collect();
                if namespaces.iter().any(String::is_empty) {
                    bail!(
                        "{} contains an empty namespace entry: {:?}",
                        constants::env::NS_FILTER,
                        raw
                    );
                }
                Some(namespaces)
            }
        };

        // Anything but the literal "false" keeps the PVC-only default.
        let pvcs_only = pvcs_only.as_deref() != Some("false");

        Ok(Config {
            namespace_filter,
            pvcs_only,
        })
    }

    /// Check whether a namespace passes the configured filter
    pub fn watches_namespace(&self, namespace: &str) -> bool {
        self.namespace_filter
            .as_ref()
            .is_none_or(|filter| filter.iter().any(|ns| ns == namespace))
    }
}
