//! Ordered chains of named transformation stages, run over a stream of artifacts such as
//! trajectory frames.
//!
//! Artifacts flow through the stages one at a time, in stage order. A stage can pass on a new
//! artifact, drop it (`Ok(None)`), reject it as bad data, or fail the whole run as
//! misconfigured. Each stage's output is saved as `<position>-<stage>-<index>.<ext>` under
//! that stage's output directory, or the pipeline's.

use std::{
    collections::HashSet,
    fmt, fs,
    path::{Path, PathBuf},
    slice,
};

use thiserror::Error;

use crate::{
    dcd::{DcdFrame, write_frames},
    error::{DuplicateNameWarning, Error, NameOrigin, Result},
    xvg::Xvg,
};

/// Something a stage produces, which can be saved to a file.
pub trait Artifact {
    /// File extension for saved copies, without the dot.
    fn extension(&self) -> &str;

    fn save(&self, path: &Path) -> Result<()>;
}

impl Artifact for DcdFrame {
    fn extension(&self) -> &str {
        "dcd"
    }

    /// A single-frame DCD file.
    fn save(&self, path: &Path) -> Result<()> {
        write_frames(path, slice::from_ref(self))?;
        Ok(())
    }
}

impl Artifact for Xvg {
    fn extension(&self) -> &str {
        "xvg"
    }

    fn save(&self, path: &Path) -> Result<()> {
        Xvg::save(self, path)
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    /// The artifact can't be processed. It's skipped, and the run continues.
    #[error("bad data: {0}")]
    Data(String),
    /// The stage can't work at all. The run stops.
    #[error("misconfigured: {0}")]
    Config(String),
}

pub type StageResult<A> = std::result::Result<Option<A>, StageError>;

pub struct Stage<A> {
    name: String,
    transform: Box<dyn FnMut(A) -> StageResult<A>>,
    output_dir: Option<PathBuf>,
}

impl<A> Stage<A> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }
}

impl<A> fmt::Debug for Stage<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Where stage outputs go, unless the stage sets its own directory.
    pub output_dir: PathBuf,
    /// Save each stage's output. Off for purely in-memory runs.
    pub write_outputs: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            write_outputs: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    /// The stage returned no output.
    Filtered { stage: String },
    Failed { stage: String, message: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SkippedArtifact {
    /// Position in the input stream, from 0.
    pub index: usize,
    pub reason: SkipReason,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub processed: usize,
    /// Artifacts that made it through every stage.
    pub emitted: usize,
    pub skipped: Vec<SkippedArtifact>,
    pub files_written: usize,
}

#[derive(Debug)]
pub struct Pipeline<A> {
    stages: Vec<Stage<A>>,
    config: PipelineConfig,
    warnings: Vec<DuplicateNameWarning>,
}

impl<A: Artifact> Pipeline<A> {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            stages: Vec::new(),
            config,
            warnings: Vec::new(),
        }
    }

    /// Append a stage. Names needn't be unique, but a repeat is noted, since [`Self::stage`]
    /// only finds the first.
    pub fn add_stage<F>(
        &mut self,
        name: impl Into<String>,
        transform: F,
        output_dir: Option<PathBuf>,
    ) -> &mut Self
    where
        F: FnMut(A) -> StageResult<A> + 'static,
    {
        let name = name.into();

        if self.stages.iter().any(|s| s.name == name) {
            let warning = DuplicateNameWarning {
                name: name.clone(),
                origin: NameOrigin::PipelineStage {
                    position: self.stages.len(),
                },
            };
            log::warn!("{warning}");
            self.warnings.push(warning);
        }

        self.stages.push(Stage {
            name,
            transform: Box::new(transform),
            output_dir,
        });
        self
    }

    pub fn stages(&self) -> &[Stage<A>] {
        &self.stages
    }

    /// The first stage with this name.
    pub fn stage(&self, name: &str) -> Option<&Stage<A>> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn warnings(&self) -> &[DuplicateNameWarning] {
        &self.warnings
    }

    /// Process a stream lazily. The returned iterator yields each artifact that makes it
    /// through every stage. An `Err` from the input stream, a misconfigured stage, or a failure
    /// to save an output ends the run.
    pub fn run<I, E>(&mut self, inputs: I) -> PipelineRun<'_, A, I::IntoIter>
    where
        I: IntoIterator<Item = std::result::Result<A, E>>,
        E: Into<Error>,
    {
        PipelineRun {
            pipeline: self,
            inputs: inputs.into_iter(),
            next_index: 0,
            created_dirs: HashSet::new(),
            summary: RunSummary::default(),
            finished: false,
        }
    }

    /// Run over every input, and collect the outputs.
    pub fn run_all<I>(&mut self, inputs: I) -> Result<(Vec<A>, RunSummary)>
    where
        I: IntoIterator<Item = A>,
    {
        let mut run = self.run(inputs.into_iter().map(Ok::<A, Error>));

        let mut outputs = Vec::new();
        for out in run.by_ref() {
            outputs.push(out?);
        }

        Ok((outputs, run.into_summary()))
    }

    /// Push one artifact through the stages. `Ok(None)` means it was skipped.
    fn process(
        &mut self,
        index: usize,
        artifact: A,
        created_dirs: &mut HashSet<PathBuf>,
        summary: &mut RunSummary,
    ) -> Result<Option<A>> {
        let mut current = artifact;

        for (position, stage) in self.stages.iter_mut().enumerate() {
            let out = match (stage.transform)(current) {
                Ok(Some(out)) => out,
                Ok(None) => {
                    log::debug!("Artifact {index} dropped by stage '{}'", stage.name);
                    summary.skipped.push(SkippedArtifact {
                        index,
                        reason: SkipReason::Filtered {
                            stage: stage.name.clone(),
                        },
                    });
                    return Ok(None);
                }
                Err(StageError::Data(message)) => {
                    log::warn!("Skipping artifact {index}: stage '{}': {message}", stage.name);
                    summary.skipped.push(SkippedArtifact {
                        index,
                        reason: SkipReason::Failed {
                            stage: stage.name.clone(),
                            message,
                        },
                    });
                    return Ok(None);
                }
                Err(StageError::Config(details)) => {
                    return Err(Error::Stage {
                        stage: stage.name.clone(),
                        details,
                    });
                }
            };

            if self.config.write_outputs {
                let dir = stage
                    .output_dir
                    .as_deref()
                    .unwrap_or(&self.config.output_dir);

                if created_dirs.insert(dir.to_path_buf()) {
                    fs::create_dir_all(dir)?;
                }

                // Position first, so stages sharing a name and directory don't collide.
                let path = dir.join(format!(
                    "{position:02}-{}-{index:06}.{}",
                    stage.name,
                    out.extension()
                ));
                out.save(&path)?;
                summary.files_written += 1;
            }

            current = out;
        }

        Ok(Some(current))
    }
}

/// An in-progress run. See [`Pipeline::run`].
pub struct PipelineRun<'p, A, I> {
    pipeline: &'p mut Pipeline<A>,
    inputs: I,
    next_index: usize,
    created_dirs: HashSet<PathBuf>,
    summary: RunSummary,
    finished: bool,
}

impl<A, I> PipelineRun<'_, A, I> {
    /// Counts so far; complete once the iterator is exhausted.
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn into_summary(self) -> RunSummary {
        self.summary
    }

    fn finish(&mut self) {
        self.finished = true;
        log::info!(
            "Pipeline run complete: {} processed, {} emitted, {} skipped, {} files written",
            self.summary.processed,
            self.summary.emitted,
            self.summary.skipped.len(),
            self.summary.files_written
        );
    }
}

impl<A, I, E> Iterator for PipelineRun<'_, A, I>
where
    A: Artifact,
    I: Iterator<Item = std::result::Result<A, E>>,
    E: Into<Error>,
{
    type Item = Result<A>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let Some(input) = self.inputs.next() else {
                self.finish();
                return None;
            };

            let index = self.next_index;
            self.next_index += 1;

            let artifact = match input {
                Ok(a) => a,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            };

            self.summary.processed += 1;

            match self.pipeline.process(
                index,
                artifact,
                &mut self.created_dirs,
                &mut self.summary,
            ) {
                Ok(Some(out)) => {
                    self.summary.emitted += 1;
                    return Some(Ok(out));
                }
                Ok(None) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::xvg::Value;

    fn table(v: f64) -> Xvg {
        Xvg::from_columns(vec![vec![Value::Number(0.)], vec![Value::Number(v)]]).unwrap()
    }

    fn value(xvg: &Xvg) -> f64 {
        xvg.numeric_column(1).unwrap()[0]
    }

    fn in_memory() -> Pipeline<Xvg> {
        Pipeline::new(PipelineConfig {
            write_outputs: false,
            ..Default::default()
        })
    }

    #[test]
    fn filtered_artifact_skips_later_stages() {
        let third_calls = Rc::new(RefCell::new(Vec::new()));
        let calls = Rc::clone(&third_calls);

        let mut pipeline = in_memory();
        pipeline
            .add_stage("double", |t: Xvg| Ok(Some(table(value(&t) * 2.))), None)
            .add_stage(
                "drop-six",
                |t: Xvg| Ok(if value(&t) == 6. { None } else { Some(t) }),
                None,
            )
            .add_stage(
                "record",
                move |t: Xvg| {
                    calls.borrow_mut().push(value(&t));
                    Ok(Some(t))
                },
                None,
            );

        let inputs = vec![table(1.), table(3.), table(5.)];
        let (outputs, summary) = pipeline.run_all(inputs).unwrap();

        assert_eq!(outputs.iter().map(value).collect::<Vec<_>>(), vec![2., 10.]);
        assert_eq!(*third_calls.borrow(), vec![2., 10.]);

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.emitted, 2);
        assert_eq!(
            summary.skipped,
            vec![SkippedArtifact {
                index: 1,
                reason: SkipReason::Filtered {
                    stage: "drop-six".into()
                },
            }]
        );
    }

    #[test]
    fn data_errors_skip_config_errors_abort() {
        let mut pipeline = in_memory();
        pipeline.add_stage(
            "check",
            |t: Xvg| match value(&t) {
                v if v < 0. => Err(StageError::Data("negative".into())),
                v if v > 100. => Err(StageError::Config("threshold too low".into())),
                _ => Ok(Some(t)),
            },
            None,
        );

        let inputs = vec![table(1.), table(-1.), table(2.), table(500.), table(3.)];
        let mut run = pipeline.run(inputs.into_iter().map(Ok::<_, Error>));

        assert_eq!(value(&run.next().unwrap().unwrap()), 1.);
        assert_eq!(value(&run.next().unwrap().unwrap()), 2.);
        let err = run.next().unwrap().unwrap_err();
        assert!(matches!(err, Error::Stage { ref stage, .. } if stage == "check"));
        assert!(run.next().is_none());

        let summary = run.summary();
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.skipped.len(), 1);
        assert!(matches!(
            &summary.skipped[0].reason,
            SkipReason::Failed { message, .. } if message == "negative"
        ));
    }

    #[test]
    fn input_errors_end_the_run() {
        let mut pipeline = in_memory();
        pipeline.add_stage("pass", |t: Xvg| Ok(Some(t)), None);

        let inputs: Vec<std::result::Result<Xvg, std::io::Error>> =
            vec![Ok(table(1.)), Err(std::io::Error::other("truncated")), Ok(table(2.))];
        let results: Vec<_> = pipeline.run(inputs).collect();

        assert_eq!(results.len(), 2);
        assert!(matches!(results[1], Err(Error::Io { .. })));
    }

    #[test]
    fn duplicate_stage_names_warn() {
        let mut pipeline = in_memory();
        pipeline
            .add_stage("smooth", |t: Xvg| Ok(Some(t)), None)
            .add_stage("smooth", |t: Xvg| Ok(Some(t)), Some("other".into()));

        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.warnings().len(), 1);
        assert_eq!(
            pipeline.warnings()[0].origin,
            NameOrigin::PipelineStage { position: 1 }
        );
        assert_eq!(pipeline.stage("smooth").unwrap().output_dir(), None);
    }

    #[test]
    fn same_named_stages_keep_separate_outputs() {
        let dir = tempfile::tempdir().unwrap();

        let mut pipeline = Pipeline::new(PipelineConfig {
            output_dir: dir.path().to_path_buf(),
            write_outputs: true,
        });
        pipeline
            .add_stage("smooth", |t: Xvg| Ok(Some(table(value(&t) + 1.))), None)
            .add_stage("smooth", |t: Xvg| Ok(Some(table(value(&t) * 10.))), None);

        let (_, summary) = pipeline.run_all(vec![table(1.)]).unwrap();
        assert_eq!(summary.files_written, 2);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);

        let first = Xvg::load(&dir.path().join("00-smooth-000000.xvg")).unwrap();
        let second = Xvg::load(&dir.path().join("01-smooth-000000.xvg")).unwrap();
        assert_eq!(value(&first), 2.);
        assert_eq!(value(&second), 20.);
    }

    #[test]
    fn outputs_go_to_stage_or_default_dirs() {
        let root = tempfile::tempdir().unwrap();
        let default_dir = root.path().join("out");
        let stage_dir = root.path().join("nested/plots");

        let mut pipeline = Pipeline::new(PipelineConfig {
            output_dir: default_dir.clone(),
            write_outputs: true,
        });
        pipeline
            .add_stage("first", |t: Xvg| Ok(Some(t)), None)
            .add_stage("second", |t: Xvg| Ok(Some(t)), Some(stage_dir.clone()));

        let (_, summary) = pipeline.run_all(vec![table(1.), table(2.)]).unwrap();
        assert_eq!(summary.files_written, 4);

        assert!(default_dir.join("00-first-000000.xvg").is_file());
        assert!(default_dir.join("00-first-000001.xvg").is_file());
        assert!(stage_dir.join("01-second-000001.xvg").is_file());

        let saved = Xvg::load(&stage_dir.join("01-second-000001.xvg")).unwrap();
        assert_eq!(value(&saved), 2.);

        // Existing directories are fine on a second run.
        assert!(pipeline.run_all(vec![table(3.)]).is_ok());
    }
}
