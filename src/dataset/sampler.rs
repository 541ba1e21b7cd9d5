//! Weighted draw of built samples with per-task floors and a per-paper cap.

use super::builder::{BuiltSample, TaskType};
use crate::config::SamplerConfig;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Share of a task's quota filled by confidence rank before drawing at random.
const HIGH_CONFIDENCE_SHARE: f64 = 0.8;

/// Task and paper spread of a sample set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleStats {
    pub total: usize,
    pub per_task: BTreeMap<TaskType, usize>,
    pub papers: usize,
    pub max_per_paper: usize,
    pub min_per_paper: usize,
}

impl SampleStats {
    pub fn of(samples: &[BuiltSample]) -> Self {
        let mut per_task: BTreeMap<TaskType, usize> = BTreeMap::new();
        let mut per_paper: HashMap<&str, usize> = HashMap::new();
        for s in samples {
            *per_task.entry(s.task).or_default() += 1;
            *per_paper.entry(s.paper_id.as_str()).or_default() += 1;
        }
        Self {
            total: samples.len(),
            per_task,
            papers: per_paper.len(),
            max_per_paper: per_paper.values().copied().max().unwrap_or(0),
            min_per_paper: per_paper.values().copied().min().unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatasetSampler {
    config: SamplerConfig,
}

impl DatasetSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Draw at most `target` samples.
    ///
    /// 1. Each weighted task gets `max(min_samples_per_task, target × weight)`
    ///    samples, or all it has. When every candidate carries a confidence,
    ///    the best 80% of the quota go first and the rest is drawn at random.
    /// 2. Any shortfall is drawn from the remaining samples, weighted by task.
    /// 3. With `balance_papers`, a paper over the cap keeps an even share of
    ///    each of its tasks, topped up at random.
    /// 4. The result is shuffled and cut to `target`.
    pub fn sample(&self, samples: &[BuiltSample], target: usize) -> Vec<BuiltSample> {
        if samples.is_empty() || target == 0 {
            return Vec::new();
        }
        let mut rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::seed_from_u64(rand::random()),
        };

        let mut by_task: BTreeMap<TaskType, Vec<usize>> = BTreeMap::new();
        for (i, s) in samples.iter().enumerate() {
            by_task.entry(s.task).or_default().push(i);
        }

        // ── Per-task quotas ──────────────────────────────────────────────
        let mut taken = vec![false; samples.len()];
        let mut selected = Vec::new();
        for (&task, &weight) in &self.config.task_weights {
            if weight <= 0.0 {
                continue;
            }
            let Some(pool) = by_task.get(&task) else {
                continue;
            };
            let want = self
                .config
                .min_samples_per_task
                .max((target as f64 * weight) as usize);
            let drawn = draw_from_task(samples, pool, want, &taken, &mut rng);
            debug!(task = %task, want, drawn = drawn.len(), "task quota");
            for i in drawn {
                taken[i] = true;
                selected.push(i);
            }
        }

        // ── Weighted top-up ──────────────────────────────────────────────
        let shortfall = target.saturating_sub(selected.len());
        if shortfall > 0 {
            let candidates: Vec<usize> = (0..samples.len())
                .filter(|&i| !taken[i] && self.config.weight(samples[i].task) > 0.0)
                .collect();
            selected.extend(self.weighted_draw(samples, &candidates, shortfall, &mut rng));
        }

        if self.config.balance_papers {
            selected = self.balance_by_paper(samples, selected, &mut rng);
        }

        selected.shuffle(&mut rng);
        selected.truncate(target);
        let out: Vec<BuiltSample> = selected.into_iter().map(|i| samples[i].clone()).collect();

        let stats = SampleStats::of(&out);
        info!(
            total = stats.total,
            papers = stats.papers,
            max_per_paper = stats.max_per_paper,
            min_per_paper = stats.min_per_paper,
            "samples drawn"
        );
        for (task, n) in &stats.per_task {
            debug!(task = %task, n, "drawn");
        }
        out
    }

    fn weighted_draw(
        &self,
        samples: &[BuiltSample],
        candidates: &[usize],
        amount: usize,
        rng: &mut ChaCha8Rng,
    ) -> Vec<usize> {
        let amount = amount.min(candidates.len());
        if amount == 0 {
            return Vec::new();
        }
        match candidates.choose_multiple_weighted(rng, amount, |&i| self.config.weight(samples[i].task)) {
            Ok(chosen) => chosen.copied().collect(),
            Err(e) => {
                warn!(error = %e, "weighted draw failed, drawing uniformly");
                candidates.choose_multiple(rng, amount).copied().collect()
            }
        }
    }

    fn balance_by_paper(&self, samples: &[BuiltSample], selected: Vec<usize>, rng: &mut ChaCha8Rng) -> Vec<usize> {
        let cap = self.config.max_samples_per_paper;

        let mut papers: Vec<(&str, Vec<usize>)> = Vec::new();
        let mut slot: HashMap<&str, usize> = HashMap::new();
        for i in selected {
            let paper = samples[i].paper_id.as_str();
            let k = *slot.entry(paper).or_insert_with(|| {
                papers.push((paper, Vec::new()));
                papers.len() - 1
            });
            papers[k].1.push(i);
        }

        let mut out = Vec::new();
        for (paper, members) in papers {
            if members.len() <= cap {
                out.extend(members);
                continue;
            }

            let mut by_task: BTreeMap<TaskType, Vec<usize>> = BTreeMap::new();
            for &i in &members {
                by_task.entry(samples[i].task).or_default().push(i);
            }
            let per_task = cap / by_task.len();
            let mut kept: Vec<usize> = Vec::with_capacity(cap);
            for group in by_task.values() {
                kept.extend(group.choose_multiple(rng, per_task.min(group.len())).copied());
            }

            let room = cap - kept.len();
            if room > 0 {
                let rest: Vec<usize> = members.iter().copied().filter(|i| !kept.contains(i)).collect();
                kept.extend(rest.choose_multiple(rng, room.min(rest.len())).copied());
            }
            debug!(paper, before = members.len(), after = kept.len(), "paper capped");
            out.extend(kept);
        }
        out
    }
}

/// Up to `want` untaken samples from `pool`.
fn draw_from_task(
    samples: &[BuiltSample],
    pool: &[usize],
    want: usize,
    taken: &[bool],
    rng: &mut ChaCha8Rng,
) -> Vec<usize> {
    let mut available: Vec<usize> = pool.iter().copied().filter(|&i| !taken[i]).collect();
    if available.len() <= want {
        return available;
    }

    if available.iter().all(|&i| samples[i].confidence.is_some()) {
        available.sort_by(|&a, &b| {
            let (ca, cb) = (
                samples[a].confidence.unwrap_or(0.0),
                samples[b].confidence.unwrap_or(0.0),
            );
            cb.total_cmp(&ca)
        });
        let top = (want as f64 * HIGH_CONFIDENCE_SHARE) as usize;
        let rest = available.split_off(top);
        let mut chosen = available;
        chosen.extend(rest.choose_multiple(rng, want - top).copied());
        chosen
    } else {
        available.choose_multiple(rng, want).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ConversationSample, Turn};
    use std::collections::HashSet;

    fn built(task: TaskType, paper: &str, n: usize, confidence: Option<f64>) -> BuiltSample {
        BuiltSample {
            task,
            paper_id: paper.to_string(),
            confidence,
            sample: ConversationSample::single(
                format!("{paper}_{task}_{n}"),
                "crops/a.png",
                10,
                10,
                vec![Turn::human("<image>\nQ"), Turn::gpt("A")],
            ),
        }
    }

    fn pool(tasks: &[TaskType], per_task: usize, papers: usize) -> Vec<BuiltSample> {
        let mut out = Vec::new();
        for &task in tasks {
            for n in 0..per_task {
                out.push(built(task, &format!("PMC{}", n % papers), n, None));
            }
        }
        out
    }

    fn ids(samples: &[BuiltSample]) -> Vec<String> {
        samples.iter().map(|s| s.sample.id.clone()).collect()
    }

    fn count(samples: &[BuiltSample], task: TaskType) -> usize {
        samples.iter().filter(|s| s.task == task).count()
    }

    #[test]
    fn seeded_draws_repeat_without_duplicates() {
        let samples = pool(
            &[TaskType::FigureCaption, TaskType::VariableExtraction, TaskType::TableReading],
            10,
            5,
        );
        let config = SamplerConfig::builder()
            .min_samples_per_task(2)
            .balance_papers(false)
            .seed(7)
            .build()
            .unwrap();
        let sampler = DatasetSampler::new(config);

        let a = sampler.sample(&samples, 12);
        let b = sampler.sample(&samples, 12);
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(a.len(), 12);
        assert_eq!(ids(&a).into_iter().collect::<HashSet<_>>().len(), 12);
    }

    #[test]
    fn low_weight_task_still_gets_its_floor() {
        let samples = pool(&[TaskType::FigureCaption, TaskType::TableReading], 20, 20);
        let config = SamplerConfig::builder()
            .task_weights([(TaskType::FigureCaption, 0.5), (TaskType::TableReading, 0.01)])
            .min_samples_per_task(3)
            .balance_papers(false)
            .seed(1)
            .build()
            .unwrap();

        let out = DatasetSampler::new(config).sample(&samples, 10);
        assert_eq!(out.len(), 10);
        assert!(count(&out, TaskType::TableReading) >= 3);
    }

    #[test]
    fn most_confident_samples_fill_the_quota_first() {
        let samples: Vec<BuiltSample> = (0..10)
            .map(|n| built(TaskType::FigureCaption, "PMC1", n, Some((n + 1) as f64 / 10.0)))
            .collect();
        let config = SamplerConfig::builder()
            .task_weights([(TaskType::FigureCaption, 1.0)])
            .min_samples_per_task(0)
            .balance_papers(false)
            .seed(3)
            .build()
            .unwrap();

        let out = DatasetSampler::new(config).sample(&samples, 5);
        assert_eq!(out.len(), 5);
        let picked: HashSet<String> = ids(&out).into_iter().collect();
        for n in 6..10 {
            assert!(picked.contains(&format!("PMC1_figure_caption_{n}")), "missing {n}");
        }
    }

    #[test]
    fn capped_paper_keeps_each_of_its_tasks() {
        let samples = pool(&[TaskType::FigureCaption, TaskType::TableReading], 10, 1);
        let config = SamplerConfig::builder()
            .task_weights([(TaskType::FigureCaption, 0.5), (TaskType::TableReading, 0.5)])
            .min_samples_per_task(0)
            .max_samples_per_paper(6)
            .seed(9)
            .build()
            .unwrap();

        let out = DatasetSampler::new(config).sample(&samples, 20);
        assert_eq!(out.len(), 6);
        assert_eq!(count(&out, TaskType::FigureCaption), 3);
        assert_eq!(count(&out, TaskType::TableReading), 3);
    }

    #[test]
    fn zero_weight_task_is_never_drawn() {
        let samples = pool(&[TaskType::FigureCaption, TaskType::TableReading], 5, 5);
        let config = SamplerConfig::builder()
            .task_weights([(TaskType::FigureCaption, 1.0), (TaskType::TableReading, 0.0)])
            .min_samples_per_task(5)
            .seed(2)
            .build()
            .unwrap();

        let out = DatasetSampler::new(config).sample(&samples, 50);
        assert_eq!(out.len(), 5);
        assert_eq!(count(&out, TaskType::TableReading), 0);
    }

    #[test]
    fn empty_pool_or_target_draws_nothing() {
        let sampler = DatasetSampler::default();
        assert!(sampler.sample(&[], 10).is_empty());
        assert!(sampler.sample(&pool(&[TaskType::FigureCaption], 3, 1), 0).is_empty());
    }

    #[test]
    fn stats_count_tasks_and_papers() {
        let samples = pool(&[TaskType::FigureCaption, TaskType::AbstractQa], 3, 2);
        let stats = SampleStats::of(&samples);
        assert_eq!(stats.total, 6);
        assert_eq!(stats.papers, 2);
        assert_eq!((stats.max_per_paper, stats.min_per_paper), (4, 2));
        assert_eq!(stats.per_task.get(&TaskType::AbstractQa), Some(&3));
    }
}
