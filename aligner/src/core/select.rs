//! Search for the smallest candidate that verifies for every project.
//!
//! The search is a pure state machine: [`AlignmentSearch::next`] names the next
//! (project, candidate) pair to verify, the caller runs it and feeds the
//! outcome back with [`AlignmentSearch::record`]. Outcomes are memoized, so no
//! pair is ever verified twice.
//!
//! Two phases:
//! 1. Per project, test candidates in ascending order and stop at the first
//!    success. A project with no success leaves the package unaligned.
//! 2. A version shared by all projects cannot be older than the newest of those
//!    first successes, so candidates are walked upward from there until one
//!    succeeds everywhere.

/// Indices into the project list and the candidate list of one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trial {
    pub project: usize,
    pub candidate: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult {
    /// Every project verified this candidate.
    Aligned { candidate: usize },
    /// These projects failed every candidate.
    Unreachable { projects: Vec<usize> },
    /// Each project succeeded somewhere, but never all on the same candidate.
    NoCommonCandidate,
    NoProjects,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStep {
    Trial(Trial),
    Done(SearchResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    FirstSuccess { project: usize, candidate: usize },
    Common { candidate: usize, project: usize },
}

#[derive(Debug, Clone)]
pub struct AlignmentSearch {
    candidates: usize,
    outcomes: Vec<Vec<Option<bool>>>,
    phase: Phase,
}

impl AlignmentSearch {
    pub fn new(projects: usize, candidates: usize) -> Self {
        Self {
            candidates,
            outcomes: vec![vec![None; candidates]; projects],
            phase: Phase::FirstSuccess {
                project: 0,
                candidate: 0,
            },
        }
    }

    /// Store the outcome of a verified pair.
    pub fn record(&mut self, trial: Trial, success: bool) {
        if let Some(slot) = self
            .outcomes
            .get_mut(trial.project)
            .and_then(|row| row.get_mut(trial.candidate))
        {
            *slot = Some(success);
        }
    }

    /// Earliest successful candidate recorded for `project`.
    pub fn first_success(&self, project: usize) -> Option<usize> {
        self.outcomes
            .get(project)?
            .iter()
            .position(|outcome| *outcome == Some(true))
    }

    /// Advance past everything already known and return the next step.
    pub fn next(&mut self) -> SearchStep {
        let projects = self.outcomes.len();
        if projects == 0 {
            return SearchStep::Done(SearchResult::NoProjects);
        }
        loop {
            match self.phase {
                Phase::FirstSuccess { project, candidate } => {
                    if project == projects {
                        match self.common_start() {
                            Ok(start) => {
                                self.phase = Phase::Common {
                                    candidate: start,
                                    project: 0,
                                };
                            }
                            Err(unreachable) => {
                                return SearchStep::Done(SearchResult::Unreachable {
                                    projects: unreachable,
                                });
                            }
                        }
                        continue;
                    }
                    if candidate == self.candidates {
                        self.phase = Phase::FirstSuccess {
                            project: project + 1,
                            candidate: 0,
                        };
                        continue;
                    }
                    match self.outcomes[project][candidate] {
                        Some(true) => {
                            self.phase = Phase::FirstSuccess {
                                project: project + 1,
                                candidate: 0,
                            };
                        }
                        Some(false) => {
                            self.phase = Phase::FirstSuccess {
                                project,
                                candidate: candidate + 1,
                            };
                        }
                        None => return SearchStep::Trial(Trial { project, candidate }),
                    }
                }
                Phase::Common { candidate, project } => {
                    if candidate == self.candidates {
                        return SearchStep::Done(SearchResult::NoCommonCandidate);
                    }
                    if project == projects {
                        return SearchStep::Done(SearchResult::Aligned { candidate });
                    }
                    match self.outcomes[project][candidate] {
                        Some(true) => {
                            self.phase = Phase::Common {
                                candidate,
                                project: project + 1,
                            };
                        }
                        Some(false) => {
                            self.phase = Phase::Common {
                                candidate: candidate + 1,
                                project: 0,
                            };
                        }
                        None => return SearchStep::Trial(Trial { project, candidate }),
                    }
                }
            }
        }
    }

    /// Newest first success across projects, or the projects that had none.
    fn common_start(&self) -> Result<usize, Vec<usize>> {
        let mut start = 0;
        let mut unreachable = Vec::new();
        for project in 0..self.outcomes.len() {
            match self.first_success(project) {
                Some(idx) => start = start.max(idx),
                None => unreachable.push(project),
            }
        }
        if unreachable.is_empty() {
            Ok(start)
        } else {
            Err(unreachable)
        }
    }
}
