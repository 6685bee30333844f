//! Boot script rendering.
//!
//! The script embedded into iPXE binaries walks every interface, runs DHCP on
//! it and chain-loads the provisioning endpoint, retrying the whole sweep a
//! fixed number of times before rebooting.

use minijinja::{context, Environment};

use crate::error::ScriptError;

const TEMPLATE_NAME: &str = "boot.ipxe";
const TEMPLATE: &str = include_str!("boot.ipxe.j2");

/// A rendered iPXE boot script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootScript(String);

impl BootScript {
    /// Render the script for the endpoint serving `/ipxe`.
    pub fn render(endpoint: &str, port: u16) -> Result<Self, ScriptError> {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.add_template(TEMPLATE_NAME, TEMPLATE)?;

        let rendered = env.get_template(TEMPLATE_NAME)?.render(context! {
            endpoint => endpoint,
            port => port,
        })?;

        Ok(Self(rendered))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
