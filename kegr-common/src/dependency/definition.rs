// kegr-common/src/dependency/definition.rs
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// How a formula uses one of its dependencies.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DependencyTag: u8 {
        const RUNTIME     = 0b00000001;
        const BUILD       = 0b00000010;
        const TEST        = 0b00000100;
        const OPTIONAL    = 0b00001000;
        const RECOMMENDED = 0b00010000;
    }
}

impl Default for DependencyTag {
    fn default() -> Self {
        Self::RUNTIME
    }
}

impl fmt::Display for DependencyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut labels = Vec::new();
        if self.contains(Self::RUNTIME) {
            labels.push("runtime");
        }
        if self.contains(Self::BUILD) {
            labels.push("build");
        }
        if self.contains(Self::TEST) {
            labels.push("test");
        }
        if self.contains(Self::OPTIONAL) {
            labels.push("optional");
        }
        if self.contains(Self::RECOMMENDED) {
            labels.push("recommended");
        }
        write!(f, "{}", labels.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub tags: DependencyTag,
}

impl Dependency {
    pub fn new_runtime(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: DependencyTag::RUNTIME,
        }
    }

    /// `depends_on "x" => :build`
    pub fn new_build(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: DependencyTag::BUILD,
        }
    }

    pub fn new_with_tags(name: impl Into<String>, tags: DependencyTag) -> Self {
        Self {
            name: name.into(),
            tags,
        }
    }

    pub fn is_optional(&self) -> bool {
        self.tags.contains(DependencyTag::OPTIONAL)
    }
}

pub trait DependencyExt {
    fn filter_by_tags(&self, include: DependencyTag, exclude: DependencyTag) -> Vec<&Dependency>;
    fn runtime(&self) -> Vec<&Dependency>;
    fn build_time(&self) -> Vec<&Dependency>;
    /// Dependencies that must be present before a source build starts.
    fn required_for_build(&self) -> Vec<&Dependency>;
    fn find_dependency(&self, name: &str) -> Option<&Dependency>;
}

impl DependencyExt for Vec<Dependency> {
    fn filter_by_tags(&self, include: DependencyTag, exclude: DependencyTag) -> Vec<&Dependency> {
        self.iter()
            .filter(|dep| dep.tags.contains(include) && !dep.tags.intersects(exclude))
            .collect()
    }

    fn runtime(&self) -> Vec<&Dependency> {
        self.iter()
            .filter(|dep| {
                dep.tags.intersects(
                    DependencyTag::RUNTIME | DependencyTag::RECOMMENDED | DependencyTag::OPTIONAL,
                )
            })
            .collect()
    }

    fn build_time(&self) -> Vec<&Dependency> {
        self.filter_by_tags(DependencyTag::BUILD, DependencyTag::empty())
    }

    fn required_for_build(&self) -> Vec<&Dependency> {
        self.iter()
            .filter(|dep| {
                dep.tags.intersects(DependencyTag::RUNTIME | DependencyTag::BUILD)
                    && !dep.is_optional()
            })
            .collect()
    }

    fn find_dependency(&self, name: &str) -> Option<&Dependency> {
        self.iter().find(|dep| dep.name == name)
    }
}
