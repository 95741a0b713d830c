use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use rand::{rngs::StdRng, seq::IndexedRandom, Rng, SeedableRng};
use serde::Serialize;

const MODEL_EXTENSIONS: [&str; 3] = ["h5", "keras", "hdf5"];

pub const NO_MODEL_FILE: &str = "(no model file)";

/// A named bucket of model files. Only decides the display label and the
/// confidence range of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModelCategory {
    Custom,
    Resnet,
    Vgg,
}

impl ModelCategory {
    pub const ALL: [ModelCategory; 3] = [Self::Custom, Self::Resnet, Self::Vgg];

    /// Value sent by the page in the `model_type` form field.
    pub fn form_name(self) -> &'static str {
        match self {
            Self::Custom => "custom_model",
            Self::Resnet => "resnet_model",
            Self::Vgg => "vgg_model",
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Custom => "custom_models",
            Self::Resnet => "resnet_models",
            Self::Vgg => "vgg_models",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Custom => "Custom CNN",
            Self::Resnet => "ResNet",
            Self::Vgg => "VGG",
        }
    }

    pub fn from_form_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.form_name() == name)
    }
}

/// Model files found per category at startup. File contents are never read.
#[derive(Debug, Default, Clone)]
pub struct ModelIndex {
    files: BTreeMap<ModelCategory, Vec<PathBuf>>,
}

impl ModelIndex {
    /// Scans `<root>/<category dir>` for every known category.
    pub fn scan(root: &Path) -> Self {
        let dirs = ModelCategory::ALL.map(|c| (c, root.join(c.dir_name())));
        Self::scan_dirs(dirs)
    }

    pub fn scan_dirs(dirs: impl IntoIterator<Item = (ModelCategory, PathBuf)>) -> Self {
        let files = dirs
            .into_iter()
            .map(|(category, dir)| (category, find_models(&dir)))
            .collect();
        Self { files }
    }

    pub fn files(&self, category: ModelCategory) -> &[PathBuf] {
        self.files.get(&category).map(Vec::as_slice).unwrap_or_default()
    }

    /// Basename of the first indexed file, which is the one shown as "used".
    pub fn display_name(&self, category: ModelCategory) -> Option<String> {
        self.files(category)
            .first()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
    }
}

fn find_models(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| is_model_file(name))
        .collect();
    names.sort();

    names.into_iter().map(|name| dir.join(name)).collect()
}

fn is_model_file(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => MODEL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub confusion_matrix: [[u32; 3]; 3],
}

pub const DEFAULT_METRICS: Metrics = Metrics {
    accuracy: 0.9,
    precision: 0.75,
    recall: 0.8,
    f1_score: 0.77,
    confusion_matrix: [[160, 8, 2], [13, 131, 26], [7, 5, 49]],
};

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub predicted_class: String,
    pub model_used: String,
    pub confidence: f64,
    pub metrics: Metrics,
}

/// Anything that can turn a request into a classification result.
pub trait PredictionSource: Send + Sync {
    fn predict(&self, model_type: &str, selected_class: &str, classes: &[String]) -> Prediction;
}

/// Fabricates predictions without looking at the image.
pub struct MockPredictor {
    index: ModelIndex,
    rng: Mutex<StdRng>,
}

impl MockPredictor {
    pub fn new(index: ModelIndex) -> Self {
        Self::with_rng(index, StdRng::from_os_rng())
    }

    #[cfg(test)]
    pub fn seeded(index: ModelIndex, seed: u64) -> Self {
        Self::with_rng(index, StdRng::seed_from_u64(seed))
    }

    fn with_rng(index: ModelIndex, rng: StdRng) -> Self {
        Self {
            index,
            rng: Mutex::new(rng),
        }
    }
}

impl PredictionSource for MockPredictor {
    fn predict(&self, model_type: &str, selected_class: &str, classes: &[String]) -> Prediction {
        let model_file = ModelCategory::from_form_name(model_type)
            .and_then(|category| self.index.display_name(category));
        let mut rng = self.rng.lock();

        let (predicted_class, model_used, confidence) = match model_file {
            Some(model_used) => {
                // blank hints are not offered as a candidate
                let mut candidates: Vec<&str> = Vec::with_capacity(classes.len() + 1);
                if !selected_class.is_empty() {
                    candidates.push(selected_class);
                }
                candidates.extend(classes.iter().map(String::as_str));

                let predicted = candidates.choose(&mut *rng).copied().unwrap_or_default();
                (predicted.to_string(), model_used, rng.random_range(50.0..=99.9))
            }
            None => {
                let predicted = if selected_class.is_empty() {
                    classes.choose(&mut *rng).cloned().unwrap_or_default()
                } else {
                    selected_class.to_string()
                };
                (predicted, NO_MODEL_FILE.to_string(), rng.random_range(55.0..=98.0))
            }
        };

        Prediction {
            predicted_class,
            model_used,
            confidence: round2(confidence),
            metrics: DEFAULT_METRICS,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> Vec<String> {
        vec!["apple".to_string(), "pizza".to_string(), "sushi".to_string()]
    }

    fn index_with_vgg(files: &[&str]) -> (tempfile::TempDir, ModelIndex) {
        let root = tempfile::tempdir().unwrap();
        let vgg = root.path().join("vgg_models");
        fs::create_dir(&vgg).unwrap();
        for name in files {
            fs::write(vgg.join(name), b"weights").unwrap();
        }
        let index = ModelIndex::scan(root.path());
        (root, index)
    }

    #[test]
    fn scan_keeps_recognized_extensions_sorted() {
        let (_root, index) =
            index_with_vgg(&["zeta.h5", "alpha.KERAS", "notes.txt", "mid.hdf5", "noext"]);

        let names: Vec<_> = index
            .files(ModelCategory::Vgg)
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["alpha.KERAS", "mid.hdf5", "zeta.h5"]);
        assert_eq!(index.display_name(ModelCategory::Vgg).as_deref(), Some("alpha.KERAS"));
    }

    #[test]
    fn missing_directories_yield_empty_lists() {
        let (_root, index) = index_with_vgg(&[]);
        assert!(index.files(ModelCategory::Custom).is_empty());
        assert!(index.files(ModelCategory::Resnet).is_empty());
        assert!(index.display_name(ModelCategory::Custom).is_none());
    }

    #[test]
    fn indexed_category_reports_first_file_and_wide_range() {
        let (_root, index) = index_with_vgg(&["b.h5", "a.h5"]);
        let predictor = MockPredictor::seeded(index, 7);
        let classes = classes();

        for _ in 0..200 {
            let p = predictor.predict("vgg_model", "pizza", &classes);
            assert_eq!(p.model_used, "a.h5");
            assert!((50.0..=99.9).contains(&p.confidence), "{}", p.confidence);
            assert!(classes.contains(&p.predicted_class));
            assert_eq!(p.metrics, DEFAULT_METRICS);
        }
    }

    #[test]
    fn indexed_category_never_predicts_blank_hint() {
        let (_root, index) = index_with_vgg(&["a.h5"]);
        let predictor = MockPredictor::seeded(index, 11);
        let classes = classes();

        for _ in 0..200 {
            let p = predictor.predict("vgg_model", "", &classes);
            assert!(!p.predicted_class.is_empty());
        }
    }

    #[test]
    fn hint_outside_catalog_is_a_candidate() {
        let (_root, index) = index_with_vgg(&["a.h5"]);
        let predictor = MockPredictor::seeded(index, 3);

        let p = predictor.predict("vgg_model", "durian", &[]);
        assert_eq!(p.predicted_class, "durian");
    }

    #[test]
    fn empty_category_uses_sentinel_and_hint() {
        let predictor = MockPredictor::seeded(ModelIndex::default(), 42);
        let classes = classes();

        for _ in 0..200 {
            let p = predictor.predict("resnet_model", "pizza", &classes);
            assert_eq!(p.model_used, NO_MODEL_FILE);
            assert_eq!(p.predicted_class, "pizza");
            assert!((55.0..=98.0).contains(&p.confidence), "{}", p.confidence);
        }
    }

    #[test]
    fn empty_category_without_hint_picks_known_class() {
        let predictor = MockPredictor::seeded(ModelIndex::default(), 5);
        let classes = classes();

        let p = predictor.predict("custom_model", "", &classes);
        assert!(classes.contains(&p.predicted_class));

        let p = predictor.predict("custom_model", "", &[]);
        assert_eq!(p.predicted_class, "");
    }

    #[test]
    fn unknown_model_type_behaves_like_empty_category() {
        let (_root, index) = index_with_vgg(&["a.h5"]);
        let predictor = MockPredictor::seeded(index, 1);

        let p = predictor.predict("transformer_model", "apple", &classes());
        assert_eq!(p.model_used, NO_MODEL_FILE);
        assert_eq!(p.predicted_class, "apple");
    }

    #[test]
    fn confidence_is_rounded_to_two_places() {
        let predictor = MockPredictor::seeded(ModelIndex::default(), 99);
        for _ in 0..50 {
            let c = predictor.predict("vgg_model", "apple", &[]).confidence;
            assert_eq!(round2(c), c);
        }
    }

    #[test]
    fn category_names_round_trip() {
        for category in ModelCategory::ALL {
            assert_eq!(ModelCategory::from_form_name(category.form_name()), Some(category));
        }
        assert_eq!(ModelCategory::from_form_name("vgg_models"), None);
    }
}
