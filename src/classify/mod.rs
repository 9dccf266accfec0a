mod backend;
mod backends;
mod registry;
mod session;

use anyhow::{anyhow, Result};

use crate::config::ClassifierSettings;

pub use backend::{Classifier, ProbabilityVector};
pub use backends::StubClassifier;
#[cfg(feature = "backend-tract")]
pub use backends::TractClassifier;
pub use registry::ClassifierRegistry;
pub use session::{ClassifierLoader, ClassifierSession, SessionPolicy};

/// Registry with every backend this build can offer for the given settings.
///
/// The configured backend becomes the default.
pub fn builtin_registry(settings: &ClassifierSettings) -> Result<ClassifierRegistry> {
    let mut registry = ClassifierRegistry::new();
    registry.register("stub", || Ok(Box::new(StubClassifier::new()) as Box<dyn Classifier>));

    #[cfg(feature = "backend-tract")]
    if let Some(path) = settings.model_path.clone() {
        registry.register("tract", move || {
            Ok(Box::new(TractClassifier::new(&path)?) as Box<dyn Classifier>)
        });
    }

    if !registry.contains(&settings.backend) {
        return Err(anyhow!(
            "classifier backend '{}' unavailable in this build (available: {})",
            settings.backend,
            registry.list().join(", ")
        ));
    }
    registry.set_default(&settings.backend)?;
    Ok(registry)
}
