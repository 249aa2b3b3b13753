//! Container image references.

/// A parsed `name[:tag]` image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Repository name, including any registry host and port.
    pub name: String,
    /// Tag after the final `:`, if present.
    pub tag: Option<String>,
}

impl ImageReference {
    /// Parses an image reference.
    ///
    /// A `:` before the last `/` belongs to a registry port. Returns `None`
    /// for an empty name (`":"`, `":latest"`), an empty tag, or more than one
    /// `:` in the final path component (`"my-image:1.0:beta"`).
    ///
    /// # Example
    ///
    /// ```
    /// use holoscan_schema::ImageReference;
    ///
    /// let image = ImageReference::parse("localhost:5000/holoscan/dev:abc").unwrap();
    /// assert_eq!(image.name, "localhost:5000/holoscan/dev");
    /// assert_eq!(image.tag.as_deref(), Some("abc"));
    /// assert!(ImageReference::parse(":latest").is_none());
    /// ```
    pub fn parse(reference: &str) -> Option<Self> {
        let (prefix, last) = match reference.rfind('/') {
            Some(idx) => reference.split_at(idx + 1),
            None => ("", reference),
        };

        let mut pieces = last.split(':');
        let base = pieces.next()?;
        let tag = pieces.next();
        if pieces.next().is_some() {
            return None;
        }

        let name = format!("{prefix}{base}");
        if base.is_empty() || name.is_empty() {
            return None;
        }
        match tag {
            Some("") => None,
            Some(tag) => Some(Self {
                name,
                tag: Some(tag.to_string()),
            }),
            None => Some(Self { name, tag: None }),
        }
    }

    /// Last path component of the name, without registry or namespace.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}
