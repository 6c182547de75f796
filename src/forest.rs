//! Estimator mechanics: feature standardisation and bagged CART forests.
//!
//! Trees are grown until leaves are pure (or a depth limit is hit) on
//! bootstrap samples drawn from a seeded ChaCha stream, so training the same
//! rows with the same parameters always yields the same forest.

use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{InsightError, Result};

const MIN_SAMPLES_SPLIT: usize = 2;
const IMPURITY_EPSILON: f64 = 1e-12;

/// Zero-mean, unit-variance scaling fitted on training rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let width = check_rows(rows)?;
        let n = rows.len() as f64;

        let mut means = vec![0.0; width];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v / n;
            }
        }

        let mut scales = vec![0.0; width];
        for row in rows {
            for ((s, v), m) in scales.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in scales.iter_mut() {
            *s = s.sqrt();
            // constant columns are centred but not scaled
            if *s < IMPURITY_EPSILON {
                *s = 1.0;
            }
        }

        Ok(Self { means, scales })
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }

    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.width() {
            return Err(InsightError::FeatureShapeMismatch {
                expected: self.width(),
                found: row.len(),
            });
        }
        Ok(row
            .iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }

    pub fn validate(&self) -> Result<()> {
        if self.means.len() != self.scales.len() {
            return Err(InsightError::MalformedModel(format!(
                "scaler has {} means but {} scales",
                self.means.len(),
                self.scales.len()
            )));
        }
        if let Some(scale) = self.scales.iter().find(|s| !s.is_finite() || **s == 0.0) {
            return Err(InsightError::MalformedModel(format!(
                "scaler divides by {scale}"
            )));
        }
        Ok(())
    }

    pub fn transform_all(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        rows.iter().map(|row| self.transform(row)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Task {
    Regression,
    Classification { n_classes: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub seed: u64,
    pub max_depth: Option<usize>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            seed: 42,
            max_depth: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Child indices always point past their parent, so a walk ends in at
    /// most `nodes.len()` steps.
    fn leaf_for(&self, row: &[f64]) -> Result<&[f64]> {
        let mut index = 0;
        loop {
            match self.nodes.get(index) {
                Some(Node::Leaf { value }) => return Ok(value.as_slice()),
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = row.get(*feature).ok_or_else(|| {
                        InsightError::MalformedModel(format!("split on missing feature {feature}"))
                    })?;
                    let next = if *value <= *threshold { *left } else { *right };
                    if next <= index {
                        return Err(InsightError::MalformedModel(format!(
                            "node {index} points back to {next}"
                        )));
                    }
                    index = next;
                }
                None => {
                    return Err(InsightError::MalformedModel(format!(
                        "node {index} out of range ({} nodes)",
                        self.nodes.len()
                    )))
                }
            }
        }
    }

    /// Describes the first structural defect, if any.
    fn defect(&self, n_features: usize, leaf_width: usize) -> Option<String> {
        if self.nodes.is_empty() {
            return Some("tree has no nodes".to_string());
        }
        self.nodes
            .iter()
            .enumerate()
            .find_map(|(index, node)| match node {
                Node::Leaf { value } if value.len() != leaf_width => Some(format!(
                    "leaf {index} holds {} values, expected {leaf_width}",
                    value.len()
                )),
                Node::Leaf { .. } => None,
                Node::Split { feature, .. } if *feature >= n_features => Some(format!(
                    "node {index} splits on feature {feature} of {n_features}"
                )),
                Node::Split { left, right, .. } => [*left, *right]
                    .into_iter()
                    .find(|&child| child <= index || child >= self.nodes.len())
                    .map(|child| {
                        format!(
                            "node {index} has child {child} outside {}..{}",
                            index + 1,
                            self.nodes.len()
                        )
                    }),
            })
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

struct TreeBuilder<'a, R: Rng> {
    rows: &'a [Vec<f64>],
    targets: &'a [f64],
    task: Task,
    max_features: usize,
    max_depth: Option<usize>,
    rng: &'a mut R,
    nodes: Vec<Node>,
}

impl<'a, R: Rng> TreeBuilder<'a, R> {
    fn grow(mut self, samples: Vec<usize>) -> DecisionTree {
        self.build(samples, 0);
        DecisionTree { nodes: self.nodes }
    }

    fn build(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let depth_reached = self.max_depth.is_some_and(|max| depth >= max);
        let split = if samples.len() < MIN_SAMPLES_SPLIT
            || depth_reached
            || self.impurity(&samples) <= IMPURITY_EPSILON
        {
            None
        } else {
            self.best_split(&samples)
        };

        let Some(split) = split else {
            let value = self.leaf_value(&samples);
            self.nodes.push(Node::Leaf { value });
            return self.nodes.len() - 1;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| self.rows[i][split.feature] <= split.threshold);

        let index = self.nodes.len();
        self.nodes.push(Node::Leaf { value: Vec::new() });
        let left = self.build(left, depth + 1);
        let right = self.build(right, depth + 1);
        self.nodes[index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        index
    }

    fn leaf_value(&self, samples: &[usize]) -> Vec<f64> {
        let n = samples.len().max(1) as f64;
        match self.task {
            Task::Regression => {
                vec![samples.iter().map(|&i| self.targets[i]).sum::<f64>() / n]
            }
            Task::Classification { n_classes } => {
                let mut proportions = vec![0.0; n_classes];
                for &i in samples {
                    proportions[self.targets[i] as usize] += 1.0 / n;
                }
                proportions
            }
        }
    }

    /// Sum of squared errors for regression, `n * gini` for classification.
    fn impurity(&self, samples: &[usize]) -> f64 {
        match self.task {
            Task::Regression => {
                let (sum, sum_sq) = samples.iter().fold((0.0, 0.0), |(s, sq), &i| {
                    let y = self.targets[i];
                    (s + y, sq + y * y)
                });
                sse(sum, sum_sq, samples.len())
            }
            Task::Classification { n_classes } => {
                let mut counts = vec![0.0; n_classes];
                for &i in samples {
                    counts[self.targets[i] as usize] += 1.0;
                }
                weighted_gini(&counts, samples.len())
            }
        }
    }

    fn best_split(&mut self, samples: &[usize]) -> Option<SplitCandidate> {
        let n_features = self.rows[0].len();
        let candidates = sample(&mut *self.rng, n_features, self.max_features.min(n_features));
        let mut best: Option<SplitCandidate> = None;

        for feature in candidates.iter() {
            let mut order = samples.to_vec();
            order.sort_by(|&a, &b| self.rows[a][feature].total_cmp(&self.rows[b][feature]));

            let mut scan = SplitScan::new(self.task, &order, self.targets);
            for k in 1..order.len() {
                scan.move_left(self.targets[order[k - 1]]);
                let lower = self.rows[order[k - 1]][feature];
                let upper = self.rows[order[k]][feature];
                if lower == upper {
                    continue;
                }
                let impurity = scan.impurity(k, order.len() - k);
                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    let mid = lower + (upper - lower) / 2.0;
                    let threshold = if mid < upper { mid } else { lower };
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        impurity,
                    });
                }
            }
        }

        best
    }
}

/// Running left/right statistics while sweeping a sorted feature column.
enum SplitScan {
    Regression {
        left_sum: f64,
        left_sq: f64,
        total_sum: f64,
        total_sq: f64,
    },
    Classification {
        left: Vec<f64>,
        total: Vec<f64>,
    },
}

impl SplitScan {
    fn new(task: Task, order: &[usize], targets: &[f64]) -> Self {
        match task {
            Task::Regression => {
                let (total_sum, total_sq) = order.iter().fold((0.0, 0.0), |(s, sq), &i| {
                    (s + targets[i], sq + targets[i] * targets[i])
                });
                SplitScan::Regression {
                    left_sum: 0.0,
                    left_sq: 0.0,
                    total_sum,
                    total_sq,
                }
            }
            Task::Classification { n_classes } => {
                let mut total = vec![0.0; n_classes];
                for &i in order {
                    total[targets[i] as usize] += 1.0;
                }
                SplitScan::Classification {
                    left: vec![0.0; n_classes],
                    total,
                }
            }
        }
    }

    fn move_left(&mut self, target: f64) {
        match self {
            SplitScan::Regression {
                left_sum, left_sq, ..
            } => {
                *left_sum += target;
                *left_sq += target * target;
            }
            SplitScan::Classification { left, .. } => {
                left[target as usize] += 1.0;
            }
        }
    }

    fn impurity(&self, n_left: usize, n_right: usize) -> f64 {
        match self {
            SplitScan::Regression {
                left_sum,
                left_sq,
                total_sum,
                total_sq,
            } => {
                sse(*left_sum, *left_sq, n_left)
                    + sse(total_sum - left_sum, total_sq - left_sq, n_right)
            }
            SplitScan::Classification { left, total } => {
                let right: Vec<f64> = total.iter().zip(left).map(|(t, l)| t - l).collect();
                weighted_gini(left, n_left) + weighted_gini(&right, n_right)
            }
        }
    }
}

fn sse(sum: f64, sum_sq: f64, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    (sum_sq - sum * sum / n as f64).max(0.0)
}

fn weighted_gini(counts: &[f64], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    let purity: f64 = counts.iter().map(|c| (c / n).powi(2)).sum();
    n * (1.0 - purity)
}

fn check_rows(rows: &[Vec<f64>]) -> Result<usize> {
    let Some(first) = rows.first() else {
        return Err(InsightError::InsufficientData {
            needed: 1,
            found: 0,
        });
    };
    let width = first.len();
    if let Some(row) = rows.iter().find(|row| row.len() != width) {
        return Err(InsightError::FeatureShapeMismatch {
            expected: width,
            found: row.len(),
        });
    }
    Ok(width)
}

/// Bagged ensemble of CART trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    task: Task,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn fit_regressor(rows: &[Vec<f64>], targets: &[f64], params: &ForestParams) -> Result<Self> {
        let width = check_rows(rows)?;
        Self::fit(Task::Regression, rows, targets, width, width, params)
    }

    pub fn fit_classifier(
        rows: &[Vec<f64>],
        labels: &[usize],
        n_classes: usize,
        params: &ForestParams,
    ) -> Result<Self> {
        let width = check_rows(rows)?;
        if let Some(&label) = labels.iter().find(|&&l| l >= n_classes) {
            return Err(InsightError::InvalidRecord(format!(
                "class label {label} outside 0..{n_classes}"
            )));
        }
        let targets: Vec<f64> = labels.iter().map(|&l| l as f64).collect();
        let max_features = ((width as f64).sqrt().ceil() as usize).max(1);
        Self::fit(
            Task::Classification { n_classes },
            rows,
            &targets,
            width,
            max_features,
            params,
        )
    }

    fn fit(
        task: Task,
        rows: &[Vec<f64>],
        targets: &[f64],
        width: usize,
        max_features: usize,
        params: &ForestParams,
    ) -> Result<Self> {
        if rows.len() != targets.len() {
            return Err(InsightError::InvalidRecord(format!(
                "{} feature rows but {} targets",
                rows.len(),
                targets.len()
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let n = rows.len();
        let trees = (0..params.n_estimators.max(1))
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                TreeBuilder {
                    rows,
                    targets,
                    task,
                    max_features,
                    max_depth: params.max_depth,
                    rng: &mut rng,
                    nodes: Vec::new(),
                }
                .grow(bootstrap)
            })
            .collect();

        Ok(Self {
            task,
            n_features: width,
            trees,
        })
    }

    fn mean_leaf(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.n_features {
            return Err(InsightError::FeatureShapeMismatch {
                expected: self.n_features,
                found: row.len(),
            });
        }
        let mut acc: Vec<f64> = Vec::new();
        for tree in &self.trees {
            let leaf = tree.leaf_for(row)?;
            if acc.is_empty() {
                acc = vec![0.0; leaf.len()];
            }
            for (a, v) in acc.iter_mut().zip(leaf) {
                *a += v / self.trees.len() as f64;
            }
        }
        Ok(acc)
    }

    /// Structural check for forests that did not come out of `fit`, such as
    /// ones read back from disk.
    pub fn validate(&self) -> Result<()> {
        let leaf_width = match self.task {
            Task::Regression => 1,
            Task::Classification { n_classes: 0 } => {
                return Err(InsightError::MalformedModel(
                    "classifier without classes".to_string(),
                ))
            }
            Task::Classification { n_classes } => n_classes,
        };
        if self.trees.is_empty() {
            return Err(InsightError::MalformedModel("forest has no trees".to_string()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            if let Some(defect) = tree.defect(self.n_features, leaf_width) {
                return Err(InsightError::MalformedModel(format!("tree {i}: {defect}")));
            }
        }
        Ok(())
    }

    /// Averaged tree output of a regression forest.
    pub fn predict_value(&self, row: &[f64]) -> Result<f64> {
        if !matches!(self.task, Task::Regression) {
            return Err(InsightError::Snapshot(
                "classification forest used for regression".to_string(),
            ));
        }
        let leaf = self.mean_leaf(row)?;
        leaf.first()
            .copied()
            .ok_or(InsightError::DegenerateStatistic)
    }

    /// Class with the highest averaged probability; ties go to the lower index.
    pub fn predict_class(&self, row: &[f64]) -> Result<usize> {
        if !matches!(self.task, Task::Classification { .. }) {
            return Err(InsightError::Snapshot(
                "regression forest used for classification".to_string(),
            ));
        }
        let probabilities = self.mean_leaf(row)?;
        probabilities
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, &p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((i, p)),
            })
            .map(|(i, _)| i)
            .ok_or(InsightError::DegenerateStatistic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ForestParams {
        ForestParams {
            n_estimators: 15,
            ..ForestParams::default()
        }
    }

    #[test]
    fn scaler_centres_and_scales_columns() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = StandardScaler::fit(&rows).unwrap();
        assert_eq!(scaler.transform(&[1.0, 5.0]).unwrap(), vec![-1.0, 0.0]);
        assert_eq!(scaler.transform(&[3.0, 5.0]).unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn scaler_rejects_other_widths() {
        let scaler = StandardScaler::fit(&[vec![1.0, 2.0, 3.0]]).unwrap();
        assert!(matches!(
            scaler.transform(&[1.0; 5]),
            Err(InsightError::FeatureShapeMismatch { expected: 3, found: 5 })
        ));
    }

    #[test]
    fn scaler_with_zero_scale_is_malformed() {
        let scaler = StandardScaler {
            means: vec![1.0, 2.0],
            scales: vec![1.0, 0.0],
        };
        assert!(matches!(scaler.validate(), Err(InsightError::MalformedModel(_))));
        let ragged = StandardScaler {
            means: vec![1.0],
            scales: vec![1.0, 2.0],
        };
        assert!(ragged.validate().is_err());
    }

    #[test]
    fn regressor_tracks_a_step_function() {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..40).map(|i| if i < 20 { 10.0 } else { 90.0 }).collect();
        let forest = RandomForest::fit_regressor(&rows, &targets, &params()).unwrap();
        assert!(forest.predict_value(&[3.0]).unwrap() < 30.0);
        assert!(forest.predict_value(&[35.0]).unwrap() > 70.0);
    }

    #[test]
    fn classifier_separates_clusters() {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..30 {
            let class = i % 3;
            rows.push(vec![class as f64 * 10.0 + (i as f64 * 0.1), 1.0]);
            labels.push(class);
        }
        let forest = RandomForest::fit_classifier(&rows, &labels, 3, &params()).unwrap();
        assert_eq!(forest.predict_class(&[0.5, 1.0]).unwrap(), 0);
        assert_eq!(forest.predict_class(&[10.5, 1.0]).unwrap(), 1);
        assert_eq!(forest.predict_class(&[21.0, 1.0]).unwrap(), 2);
    }

    #[test]
    fn training_is_deterministic_for_a_seed() {
        let rows: Vec<Vec<f64>> = (0..25).map(|i| vec![i as f64, (i * 7 % 5) as f64]).collect();
        let targets: Vec<f64> = rows.iter().map(|r| r[0] * 2.0 + r[1]).collect();
        let a = RandomForest::fit_regressor(&rows, &targets, &params()).unwrap();
        let b = RandomForest::fit_regressor(&rows, &targets, &params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn forest_rejects_wrong_width_at_inference() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, 1.0, 2.0]).collect();
        let targets: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let forest = RandomForest::fit_regressor(&rows, &targets, &params()).unwrap();
        assert!(forest.predict_value(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn forest_refuses_the_other_task() {
        let rows = vec![vec![1.0], vec![2.0], vec![3.0]];
        let regressor = RandomForest::fit_regressor(&rows, &[1.0, 2.0, 3.0], &params()).unwrap();
        assert!(regressor.predict_class(&[1.0]).is_err());
        let classifier = RandomForest::fit_classifier(&rows, &[0, 1, 1], 2, &params()).unwrap();
        assert!(classifier.predict_value(&[1.0]).is_err());
    }

    #[test]
    fn fitted_forests_pass_validation() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, (i % 4) as f64]).collect();
        let targets: Vec<f64> = rows.iter().map(|r| r[0] + r[1]).collect();
        let labels: Vec<usize> = (0..20).map(|i| i % 3).collect();
        assert!(RandomForest::fit_regressor(&rows, &targets, &params())
            .unwrap()
            .validate()
            .is_ok());
        assert!(RandomForest::fit_classifier(&rows, &labels, 3, &params())
            .unwrap()
            .validate()
            .is_ok());
    }

    fn single_tree(nodes: Vec<Node>) -> RandomForest {
        RandomForest {
            task: Task::Regression,
            n_features: 2,
            trees: vec![DecisionTree { nodes }],
        }
    }

    fn split(feature: usize, left: usize, right: usize) -> Node {
        Node::Split {
            feature,
            threshold: 0.5,
            left,
            right,
        }
    }

    fn leaf(value: f64) -> Node {
        Node::Leaf { value: vec![value] }
    }

    #[test]
    fn malformed_trees_fail_validation_and_inference() {
        let broken = [
            single_tree(Vec::new()),
            single_tree(vec![split(0, 1, 7), leaf(1.0)]),
            single_tree(vec![split(5, 1, 2), leaf(1.0), leaf(2.0)]),
            single_tree(vec![split(0, 0, 0)]),
            single_tree(vec![leaf(1.0), split(0, 0, 1)]),
            single_tree(vec![Node::Leaf { value: Vec::new() }]),
        ];
        for forest in &broken {
            assert!(
                matches!(forest.validate(), Err(InsightError::MalformedModel(_))),
                "{forest:?}"
            );
        }

        // inference returns errors instead of panicking or looping
        for forest in &broken[..4] {
            assert!(forest.predict_value(&[1.0, 1.0]).is_err(), "{forest:?}");
        }

        let no_trees = RandomForest {
            task: Task::Regression,
            n_features: 2,
            trees: Vec::new(),
        };
        assert!(no_trees.validate().is_err());
    }

    #[test]
    fn well_formed_tree_walks_to_its_leaf() {
        let forest = single_tree(vec![split(1, 1, 2), leaf(10.0), leaf(90.0)]);
        assert!(forest.validate().is_ok());
        assert_eq!(forest.predict_value(&[0.0, 0.0]).unwrap(), 10.0);
        assert_eq!(forest.predict_value(&[0.0, 1.0]).unwrap(), 90.0);
    }

    #[test]
    fn labels_outside_class_range_are_rejected() {
        let rows = vec![vec![1.0], vec![2.0]];
        assert!(RandomForest::fit_classifier(&rows, &[0, 3], 3, &params()).is_err());
    }

    #[test]
    fn empty_training_set_is_insufficient() {
        assert!(matches!(
            RandomForest::fit_regressor(&[], &[], &params()),
            Err(InsightError::InsufficientData { .. })
        ));
    }
}
