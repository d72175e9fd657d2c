//! Structured image references: `[registry/]organisation/repository:version[-name]`.

use std::fmt;
use std::str::FromStr;

use crate::error::{D2Error, D2Result};

/// Repository token of data images (database dump + apps).
pub const DATA_REPOSITORY: &str = "dhis2-data";

/// Repository token of the companion application-server images.
pub const CORE_REPOSITORY: &str = "dhis2-core";

/// What an image reference points at, derived from its repository token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Data,
    Core,
    Other,
}

/// Parsed image reference. Immutable; the `with_*` methods return copies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: Option<String>,
    organisation: String,
    repository: String,
    version: String,
    name: Option<String>,
}

impl ImageReference {
    /// Parse a reference such as `eyeseetea/dhis2-data:2.34-sierra` or
    /// `registry.example.com:5000/eyeseetea/dhis2-data:2.36`.
    pub fn parse(s: &str) -> D2Result<Self> {
        let segments: Vec<&str> = s.split('/').collect();
        let (registry, organisation, repo_tag) = match segments.as_slice() {
            [organisation, repo_tag] => (None, *organisation, *repo_tag),
            [registry, organisation, repo_tag] => (Some(*registry), *organisation, *repo_tag),
            _ => {
                return Err(D2Error::format(
                    s,
                    "expected [REGISTRY/]ORGANISATION/REPOSITORY:TAG",
                ));
            }
        };

        let (repository, tag) = repo_tag
            .split_once(':')
            .ok_or_else(|| D2Error::format(s, "missing ':TAG'"))?;
        let (version, name) = match tag.split_once('-') {
            Some((version, name)) => (version, Some(name)),
            None => (tag, None),
        };

        if registry.is_some_and(str::is_empty) {
            return Err(D2Error::format(s, "empty registry"));
        }
        if organisation.is_empty() {
            return Err(D2Error::format(s, "empty organisation"));
        }
        if repository.is_empty() {
            return Err(D2Error::format(s, "empty repository"));
        }
        if version.is_empty() {
            return Err(D2Error::format(s, "empty version"));
        }

        Ok(Self {
            registry: registry.map(str::to_string),
            organisation: organisation.to_string(),
            repository: repository.to_string(),
            version: version.to_string(),
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
        })
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn organisation(&self) -> &str {
        &self.organisation
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> ImageKind {
        match self.repository.as_str() {
            DATA_REPOSITORY => ImageKind::Data,
            CORE_REPOSITORY => ImageKind::Core,
            _ => ImageKind::Other,
        }
    }

    /// `version[-name]`
    pub fn tag(&self) -> String {
        match &self.name {
            Some(name) => format!("{}-{}", self.version, name),
            None => self.version.clone(),
        }
    }

    pub fn with_version(&self, version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..self.clone()
        }
    }

    pub fn with_type(&self, repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
            ..self.clone()
        }
    }

    /// Replace the name suffix. `None` or an empty string clears it.
    pub fn with_name(&self, name: Option<&str>) -> Self {
        Self {
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
            ..self.clone()
        }
    }

    /// Companion core image: same registry, organisation and version,
    /// core repository, no name suffix.
    ///
    /// `eyeseetea/dhis2-data:2.30-sierra` → `eyeseetea/dhis2-core:2.30`
    pub fn core_reference(&self) -> Self {
        self.with_type(CORE_REPOSITORY).with_name(None)
    }

    /// Whether `s` names a data image (`ORG/dhis2-data:TAG`) rather than a
    /// local folder.
    pub fn is_data_image(s: &str) -> bool {
        match s.split_once('/') {
            Some((_, rest)) if !rest.contains('/') => rest
                .split_once(':')
                .is_some_and(|(repository, tag)| {
                    repository == DATA_REPOSITORY && !tag.is_empty() && !tag.contains(':')
                }),
            _ => false,
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        write!(f, "{}/{}:{}", self.organisation, self.repository, self.tag())
    }
}

impl FromStr for ImageReference {
    type Err = D2Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_image_with_name() {
        let image = ImageReference::parse("eyeseetea/dhis2-data:2.34-sierra").unwrap();
        assert_eq!(image.registry(), None);
        assert_eq!(image.organisation(), "eyeseetea");
        assert_eq!(image.repository(), "dhis2-data");
        assert_eq!(image.version(), "2.34");
        assert_eq!(image.name(), Some("sierra"));
        assert_eq!(image.kind(), ImageKind::Data);
    }

    #[test]
    fn test_core_reference() {
        let image = ImageReference::parse("eyeseetea/dhis2-data:2.34-sierra").unwrap();
        let core = image.core_reference();
        assert_eq!(core.to_string(), "eyeseetea/dhis2-core:2.34");
        assert_eq!(core.kind(), ImageKind::Core);
    }

    #[test]
    fn test_parse_with_registry() {
        let image =
            ImageReference::parse("localhost:5000/eyeseetea/dhis2-data:2.36.1-ento").unwrap();
        assert_eq!(image.registry(), Some("localhost:5000"));
        assert_eq!(image.organisation(), "eyeseetea");
        assert_eq!(image.version(), "2.36.1");
        assert_eq!(image.name(), Some("ento"));
        assert_eq!(
            image.core_reference().to_string(),
            "localhost:5000/eyeseetea/dhis2-core:2.36.1"
        );
    }

    #[test]
    fn test_name_keeps_later_dashes() {
        let image = ImageReference::parse("org/dhis2-data:2.30-sierra-leone").unwrap();
        assert_eq!(image.version(), "2.30");
        assert_eq!(image.name(), Some("sierra-leone"));
    }

    #[test]
    fn test_parse_errors() {
        for input in [
            "dhis2-data:2.34",
            "eyeseetea/dhis2-data",
            "eyeseetea/dhis2-data:",
            "eyeseetea/:2.34",
            "/dhis2-data:2.34",
            "a/b/c/dhis2-data:2.34",
        ] {
            let err = ImageReference::parse(input).unwrap_err();
            assert!(matches!(err, D2Error::Format { .. }), "{input}");
        }
    }

    #[test]
    fn test_format_round_trip() {
        for input in [
            "eyeseetea/dhis2-data:2.34",
            "eyeseetea/dhis2-data:2.34-sierra",
            "eyeseetea/dhis2-core:2.36.4",
            "docker.io/eyeseetea/dhis2-data:2.37-who-demo",
        ] {
            let image: ImageReference = input.parse().unwrap();
            assert_eq!(image.to_string(), input);
            assert_eq!(ImageReference::parse(&image.to_string()).unwrap(), image);
        }
    }

    #[test]
    fn test_with_methods_do_not_mutate() {
        let image = ImageReference::parse("org/dhis2-data:2.34-x").unwrap();
        let changed = image
            .with_version("2.35")
            .with_name(Some("y"))
            .with_type("custom");
        assert_eq!(image.to_string(), "org/dhis2-data:2.34-x");
        assert_eq!(changed.to_string(), "org/custom:2.35-y");
        assert_eq!(changed.kind(), ImageKind::Other);
        assert_eq!(image.with_name(Some("")).to_string(), "org/dhis2-data:2.34");
    }

    #[test]
    fn test_is_data_image() {
        assert!(ImageReference::is_data_image("eyeseetea/dhis2-data:2.34"));
        assert!(!ImageReference::is_data_image("eyeseetea/dhis2-core:2.34"));
        assert!(!ImageReference::is_data_image("./some/folder"));
        assert!(!ImageReference::is_data_image("dump-folder"));
    }
}
