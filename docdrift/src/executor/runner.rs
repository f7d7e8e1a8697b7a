//! Migration runner: applies pending scripts and reverts applied ones.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};

use super::script::{ScriptFile, discover, normalize_filename};
use super::validate::validate_scripts;
use super::{BatchFailure, BatchReport, Direction, ExecutorOptions, MigrationOutcome, MigrationStatus, Phase};
use crate::command::MigrationCommand;
use crate::errors::DriftError;
use crate::ledger::{Ledger, MigrationRecord};
use crate::store::{DocumentStore, SessionId};

/// Sequential migration executor.
///
/// Holds the store exclusively for the duration of a batch, so at most one
/// session is open at a time.
pub struct Executor<'s, S: DocumentStore> {
    store: &'s mut S,
    ledger: Ledger,
    options: ExecutorOptions,
}

/// A migration selected for a batch.
struct Planned {
    filename: String,
    commands: Vec<MigrationCommand>,
    warnings: Vec<String>,
}

impl<'s, S: DocumentStore> Executor<'s, S> {
    pub fn new(store: &'s mut S, ledger: Ledger, options: ExecutorOptions) -> Self {
        Self { store, ledger, options }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Apply every pending script in `dir`, ascending by filename.
    ///
    /// All scripts are validated before anything runs. A failing migration
    /// stops the batch; the report carries how many committed before it.
    pub async fn migrate_up(&mut self, dir: &Path) -> Result<BatchReport, DriftError> {
        let mut report = BatchReport::new(Direction::Up, self.options.dry_run);
        let scripts = validate_scripts(discover(dir)?)?;
        if scripts.is_empty() {
            info!("no migration scripts in {}", dir.display());
            return Ok(report);
        }

        let applied = self.ledger.list_applied(self.store).await?;
        let baseline = applied.last().map(|r| r.filename.clone());
        let applied: HashSet<String> = applied.into_iter().map(|r| r.filename).collect();

        let pending: Vec<_> = scripts
            .into_iter()
            .filter(|s| !applied.contains(&s.file.filename))
            .collect();
        if pending.is_empty() {
            info!("all {} migration(s) are up to date", applied.len());
            return Ok(report);
        }
        info!(
            "{} migration(s) pending, {} already applied",
            pending.len(),
            applied.len()
        );

        if self.options.dry_run {
            for script in &pending {
                report.outcomes.push(self.preview(
                    &script.file.filename,
                    &script.script.up,
                    Direction::Up,
                    &script.warnings,
                ));
            }
            return Ok(report);
        }

        self.ledger.initialize(self.store).await?;

        for script in pending {
            let filename = script.file.filename.clone();
            let planned = Planned {
                filename: filename.clone(),
                commands: script.script.up.clone(),
                warnings: script.warnings.clone(),
            };

            let recorded = self
                .ledger
                .create_record(
                    self.store,
                    &filename,
                    &script.script.from_hash,
                    &script.script.to_hash,
                    &script.script.up,
                    &script.script.down,
                )
                .await;
            if let Err(err) = recorded {
                let mut outcome = MigrationOutcome::new(&filename, Direction::Up);
                outcome.phase = Phase::Failed;
                outcome.error = Some(err.to_string());
                report.outcomes.push(outcome);
                report.failure = Some(up_failure(&filename, &err, report.succeeded, baseline.as_deref()));
                return Ok(report);
            }

            let (outcome, err) = self.run(planned, Direction::Up).await;
            let committed = outcome.phase == Phase::Committed;
            report.outcomes.push(outcome);
            if committed {
                report.succeeded += 1;
            }
            if let Some(err) = err {
                report.failure = Some(up_failure(&filename, &err, report.succeeded, baseline.as_deref()));
                return Ok(report);
            }
        }

        info!("applied {} migration(s)", report.succeeded);
        Ok(report)
    }

    /// Revert the most recently applied migration, or every migration applied
    /// after `target` (newest first). The target itself stays applied.
    pub async fn rollback(&mut self, dir: &Path, target: Option<&str>) -> Result<BatchReport, DriftError> {
        let mut report = BatchReport::new(Direction::Down, self.options.dry_run);
        let applied = self.ledger.list_applied(self.store).await?;

        let to_revert: Vec<MigrationRecord> = match target {
            None => applied.last().cloned().into_iter().collect(),
            Some(target) => {
                let target = normalize_filename(target);
                let position = applied
                    .iter()
                    .position(|r| r.filename == target)
                    .ok_or_else(|| DriftError::Other {
                        message: format!("rollback target `{target}` is not an applied migration").into(),
                    })?;
                applied[position + 1..].iter().rev().cloned().collect()
            }
        };
        if to_revert.is_empty() {
            info!("nothing to roll back");
            return Ok(report);
        }

        let files: Vec<ScriptFile> = discover(dir)?
            .into_iter()
            .filter(|f| to_revert.iter().any(|r| r.filename == f.filename))
            .collect();
        let mut on_disk: HashMap<String, _> = validate_scripts(files)?
            .into_iter()
            .map(|s| (s.file.filename.clone(), s))
            .collect();

        let mut plan = Vec::with_capacity(to_revert.len());
        for record in to_revert {
            let planned = match on_disk.remove(&record.filename) {
                Some(script) => Planned {
                    filename: record.filename,
                    commands: script.script.down,
                    warnings: script.warnings,
                },
                None => {
                    warn!(
                        "{}: script file is missing; using down commands from the ledger",
                        record.filename
                    );
                    Planned {
                        filename: record.filename,
                        commands: record.down_commands,
                        warnings: Vec::new(),
                    }
                }
            };
            plan.push(planned);
        }

        if self.options.dry_run {
            for planned in &plan {
                report.outcomes.push(self.preview(
                    &planned.filename,
                    &planned.commands,
                    Direction::Down,
                    &planned.warnings,
                ));
            }
            return Ok(report);
        }

        for planned in plan {
            let filename = planned.filename.clone();
            let (outcome, err) = self.run(planned, Direction::Down).await;
            let committed = outcome.phase == Phase::Committed;
            report.outcomes.push(outcome);
            if committed {
                report.succeeded += 1;
            }
            if let Some(err) = err {
                report.failure = Some(BatchFailure {
                    migration: filename.clone(),
                    message: err.to_string(),
                    remedy: format!(
                        "{} migration(s) reverted; fix `{filename}` and re-run `docdrift migrate down`",
                        report.succeeded
                    ),
                });
                return Ok(report);
            }
        }

        info!("reverted {} migration(s)", report.succeeded);
        Ok(report)
    }

    /// Applied state of every script in `dir`, plus ledger records whose file is gone.
    pub async fn status(&mut self, dir: &Path) -> Result<Vec<MigrationStatus>, DriftError> {
        let files = discover(dir)?;
        let mut records: HashMap<String, MigrationRecord> = self
            .ledger
            .list_all(self.store)
            .await?
            .into_iter()
            .map(|r| (r.filename.clone(), r))
            .collect();

        let mut statuses = Vec::with_capacity(files.len());
        for file in files {
            let record = records.remove(&file.filename);
            statuses.push(MigrationStatus {
                applied: record.as_ref().is_some_and(|r| r.is_applied),
                applied_at: record.as_ref().and_then(|r| r.applied_at),
                reverted_at: record.as_ref().and_then(|r| r.reverted_at),
                file_present: true,
                checksum: Some(file.checksum),
                filename: file.filename,
            });
        }
        for (filename, record) in records {
            statuses.push(MigrationStatus {
                filename,
                applied: record.is_applied,
                applied_at: record.applied_at,
                reverted_at: record.reverted_at,
                file_present: false,
                checksum: None,
            });
        }

        statuses.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(statuses)
    }

    fn preview(
        &self,
        filename: &str,
        commands: &[MigrationCommand],
        direction: Direction,
        warnings: &[String],
    ) -> MigrationOutcome {
        let mut outcome = MigrationOutcome::new(filename, direction);
        outcome.warnings = warnings.to_vec();
        info!("[dry run] would apply {filename} ({direction})");
        for command in commands {
            if command.is_manual() {
                outcome.manual.push(command.to_string());
            } else if command.is_executable() {
                outcome.commands_run += 1;
            }
            debug!("[dry run]   {command}");
        }
        outcome
    }

    /// Run one migration to completion and return its outcome, plus the
    /// error that stopped it if any.
    async fn run(&mut self, planned: Planned, direction: Direction) -> (MigrationOutcome, Option<DriftError>) {
        let mut outcome = MigrationOutcome::new(&planned.filename, direction);
        outcome.warnings = planned.warnings;
        outcome.manual = planned
            .commands
            .iter()
            .filter(|c| c.is_manual())
            .map(ToString::to_string)
            .collect();

        outcome.phase = Phase::Validating;
        for command in planned.commands.iter().filter(|c| !c.is_executable()) {
            debug!("{}: skipping non-executable {command}", planned.filename);
        }

        outcome.phase = Phase::Applying;
        info!("applying {} ({direction})", planned.filename);
        let started = Instant::now();

        let applied = match self
            .apply_in_session(&planned.filename, &planned.commands, direction, started, &mut outcome)
            .await
        {
            Err(err) if err.is_transaction_capability() => {
                warn!(
                    "{}: {err}; retrying without a transaction",
                    planned.filename
                );
                outcome.phase = Phase::FailedRetrying;
                outcome.transactional = false;
                outcome.commands_run = 0;
                outcome.documents_affected = 0;
                self.apply_without_session(&planned.filename, &planned.commands, direction, started, &mut outcome)
                    .await
            }
            other => other,
        };

        if let Err(err) = applied {
            warn!("{} failed: {err}", planned.filename);
            outcome.phase = Phase::Failed;
            outcome.execution_time_ms = elapsed_ms(started);
            outcome.error = Some(err.to_string());
            return (outcome, Some(err));
        }
        outcome.phase = Phase::Committed;
        info!(
            "{} committed in {}ms ({} command(s), {} document(s))",
            planned.filename, outcome.execution_time_ms, outcome.commands_run, outcome.documents_affected
        );

        if !outcome.manual.is_empty() {
            if self.options.run_manual {
                if let Err(err) = self.run_manual(&planned.filename, &planned.commands).await {
                    outcome.error = Some(err.to_string());
                    return (outcome, Some(err));
                }
                outcome.manual_executed = true;
            } else {
                warn!(
                    "{}: {} manual command(s) not executed",
                    planned.filename,
                    outcome.manual.len()
                );
            }
        }
        (outcome, None)
    }

    async fn apply_in_session(
        &mut self,
        filename: &str,
        commands: &[MigrationCommand],
        direction: Direction,
        started: Instant,
        outcome: &mut MigrationOutcome,
    ) -> Result<(), DriftError> {
        let session = self.store.start_session().await?;
        debug!("{filename}: session {session}");

        let result = self
            .apply_and_record(filename, commands, direction, started, Some(&session), outcome)
            .await;
        let result = match result {
            Ok(()) => self.store.commit_session(&session).await.map_err(DriftError::from),
            Err(err) => Err(err),
        };
        if result.is_err() {
            self.abort(&session).await;
        }
        result
    }

    async fn apply_without_session(
        &mut self,
        filename: &str,
        commands: &[MigrationCommand],
        direction: Direction,
        started: Instant,
        outcome: &mut MigrationOutcome,
    ) -> Result<(), DriftError> {
        self.apply_commands(filename, commands, None, outcome).await?;
        tokio::time::sleep(self.options.settle_delay).await;
        outcome.execution_time_ms = elapsed_ms(started);
        self.ledger
            .set_applied(
                self.store,
                filename,
                direction == Direction::Up,
                Some(outcome.execution_time_ms),
                None,
            )
            .await?;
        Ok(())
    }

    async fn apply_and_record(
        &mut self,
        filename: &str,
        commands: &[MigrationCommand],
        direction: Direction,
        started: Instant,
        session: Option<&SessionId>,
        outcome: &mut MigrationOutcome,
    ) -> Result<(), DriftError> {
        self.apply_commands(filename, commands, session, outcome).await?;
        outcome.execution_time_ms = elapsed_ms(started);
        self.ledger
            .set_applied(
                self.store,
                filename,
                direction == Direction::Up,
                Some(outcome.execution_time_ms),
                session,
            )
            .await?;
        Ok(())
    }

    async fn apply_commands(
        &mut self,
        filename: &str,
        commands: &[MigrationCommand],
        session: Option<&SessionId>,
        outcome: &mut MigrationOutcome,
    ) -> Result<(), DriftError> {
        for command in commands.iter().filter(|c| c.is_executable() && !c.is_manual()) {
            let mut bound = command.clone();
            match session {
                Some(session) => bound.bind_session(session),
                None => bound.clear_session(),
            }
            debug!("{filename}: {bound}");
            let affected = self
                .store
                .execute(&bound.command, bound.options.session.as_ref())
                .await?;
            outcome.commands_run += 1;
            outcome.documents_affected += affected;
        }
        Ok(())
    }

    async fn run_manual(&mut self, filename: &str, commands: &[MigrationCommand]) -> Result<(), DriftError> {
        for command in commands.iter().filter(|c| c.is_manual() && c.is_executable()) {
            info!("{filename}: running manual command {}", command.command);
            self.store.execute(&command.command, None).await?;
        }
        Ok(())
    }

    async fn abort(&mut self, session: &SessionId) {
        if let Err(err) = self.store.abort_session(session).await {
            warn!("failed to abort session {session}: {err}");
        }
    }
}

fn up_failure(filename: &str, err: &DriftError, succeeded: usize, baseline: Option<&str>) -> BatchFailure {
    let remedy = match (succeeded, baseline) {
        (0, _) => format!("no migration in this batch was applied; fix `{filename}` and re-run `docdrift migrate up`"),
        (n, Some(baseline)) => format!("{n} migration(s) applied; run `docdrift migrate down --target {baseline}` to undo them"),
        (n, None) => format!("{n} migration(s) applied; run `docdrift migrate down` {n} time(s) to undo them"),
    };
    BatchFailure {
        migration: filename.to_string(),
        message: err.to_string(),
        remedy,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
