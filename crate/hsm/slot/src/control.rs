//! Caller-supplied settings used when creating token objects.
//! They are consumed at creation time and never stored.

/// Desired id and label of a new token object (e.g. a certificate)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewObjectControl {
    id: Option<Vec<u8>>,
    label: Option<String>,
}

impl NewObjectControl {
    #[must_use]
    pub const fn new(id: Option<Vec<u8>>, label: Option<String>) -> Self {
        Self { id, label }
    }

    #[must_use]
    pub fn id(&self) -> Option<&[u8]> {
        self.id.as_deref()
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    #[must_use]
    pub fn with_label(self, label: String) -> Self {
        Self {
            label: Some(label),
            ..self
        }
    }
}

/// Desired id, label and usage flags of a new key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewKeyControl {
    id: Option<Vec<u8>>,
    label: Option<String>,
    /// Whether the private or secret key may be exported in wrapped form
    pub extractable: bool,
    /// Whether the key value is protected from being read in clear
    pub sensitive: bool,
}

impl Default for NewKeyControl {
    fn default() -> Self {
        Self {
            id: None,
            label: None,
            extractable: false,
            sensitive: true,
        }
    }
}

impl NewKeyControl {
    #[must_use]
    pub fn new(id: Option<Vec<u8>>, label: Option<String>) -> Self {
        Self {
            id,
            label,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<&[u8]> {
        self.id.as_deref()
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    #[must_use]
    pub const fn with_extractable(mut self, extractable: bool) -> Self {
        self.extractable = extractable;
        self
    }

    #[must_use]
    pub const fn with_sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }
}
