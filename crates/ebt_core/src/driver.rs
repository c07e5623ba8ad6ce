//! Integration step driver.
//!
//! `IntegrationCore` owns the flat buffers, the configured method and the
//! persistent controller state. One call to [`IntegrationCore::integration_step`]
//! clamps the requested step against the distance to the next boundary,
//! retries rejected attempts with the step the method proposes, and on
//! acceptance locates events, samples intermediate output from the dense
//! interpolant and copies the new state back into the caller's tables.
//!
//! Fatal conditions flush the staged boundary cohorts before they are
//! returned, so the caller always sees a consistent end state.

use tracing::{debug, error, info};

use crate::constants::{DEFAULT_STEP, MAX_RECURSIONS, SMALLEST_STEP};
use crate::diagnostics::DebugLog;
use crate::error::{IntegrationError, Result};
use crate::events::{EventTracker, LocatedEvent};
use crate::layout::StateArena;
use crate::population::SystemState;
use crate::settings::{IntegratorSettings, OutputSchedule};
use crate::solvers::{clamp_step, Integrator, Solver, SolverStatistics, StepContext, StepControl, StepOutcome};
use crate::stage::StageEvaluator;
use crate::traits::{CohortModel, OutputSink};

pub struct IntegrationCore<S = Solver> {
    settings: IntegratorSettings,
    log: DebugLog,
    arena: StateArena,
    solver: S,
    control: StepControl,
    events: EventTracker,
    schedule: OutputSchedule,
    schedule_anchored: bool,
    cohort_end: bool,
    located: Option<LocatedEvent>,
    stats: SolverStatistics,
}

impl IntegrationCore<Solver> {
    /// Validate the settings and build the method that suits a model with
    /// `event_count` event indicators.
    pub fn new(settings: IntegratorSettings, event_count: usize) -> anyhow::Result<Self> {
        settings.validate()?;
        let method = settings.method.resolve(event_count);
        if method != settings.method {
            info!(
                requested = settings.method.name(),
                used = method.name(),
                "events need dense output, switching integration method"
            );
        }
        Ok(Self::with_solver(settings, Solver::build(method), event_count))
    }
}

impl<S: Integrator> IntegrationCore<S> {
    /// Core around an already constructed method. Settings are taken as valid.
    pub fn with_solver(settings: IntegratorSettings, solver: S, event_count: usize) -> Self {
        let initial = if settings.initial_step > 0.0 {
            settings.initial_step
        } else {
            DEFAULT_STEP
        };
        debug!(method = solver.method().name(), initial_step = initial, "integration core ready");
        Self {
            log: DebugLog::new(settings.debug_level),
            schedule: OutputSchedule::starting_at(0.0, &settings),
            schedule_anchored: false,
            settings,
            arena: StateArena::default(),
            solver,
            control: StepControl::new(initial),
            events: EventTracker::new(event_count),
            cohort_end: false,
            located: None,
            stats: SolverStatistics::default(),
        }
    }

    /// Replace the diagnostic log, e.g. to attach a writer.
    pub fn with_log(mut self, log: DebugLog) -> Self {
        self.log = log;
        self
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    pub fn log_mut(&mut self) -> &mut DebugLog {
        &mut self.log
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Working step the controller proposes for the next call.
    pub fn step_size(&self) -> f64 {
        self.control.step_size
    }

    /// Seed or override the controller between cycles.
    pub fn set_step_size(&mut self, step: f64) {
        self.control.step_size = step;
    }

    /// True once a located event has closed the current cohort cycle.
    pub fn cohort_end(&self) -> bool {
        self.cohort_end
    }

    /// Event that ended the most recent accepted step early, if any.
    pub fn located_event(&self) -> Option<&LocatedEvent> {
        self.located.as_ref()
    }

    pub fn schedule(&self) -> &OutputSchedule {
        &self.schedule
    }

    pub fn set_schedule(&mut self, schedule: OutputSchedule) {
        self.schedule = schedule;
        self.schedule_anchored = true;
    }

    /// Restart both output streams one interval after `start`.
    pub fn reset_schedule(&mut self, start: f64) {
        self.schedule = OutputSchedule::starting_at(start, &self.settings);
        self.schedule_anchored = true;
    }

    pub fn statistics(&self) -> SolverStatistics {
        SolverStatistics {
            function_evaluations: self.stats.function_evaluations,
            accepted: self.stats.accepted,
            rejected: self.stats.rejected,
            ..self.solver.statistics()
        }
    }

    /// Size all buffers for the current cohort tables and load the state.
    /// Must be called at the start of every cohort cycle.
    ///
    /// The first cycle anchors the output schedule at the system time unless
    /// a schedule was installed explicitly; later cycles only skip sample
    /// times the system has already passed.
    pub fn prepare_cycle(&mut self, system: &mut SystemState, model: &dyn CohortModel) -> Result<()> {
        let prepared = self
            .arena
            .prepare(system)
            .and_then(|_| self.solver.prepare_cycle(self.arena.system_size(), &mut self.control));
        if let Err(err) = prepared {
            return Err(self.fail(system, err));
        }
        if self.schedule_anchored {
            self.schedule.catch_up(system.time() - self.settings.identical_zero);
        } else {
            self.reset_schedule(system.time());
        }
        self.events.resize(model.event_count());
        self.cohort_end = false;
        self.located = None;
        Ok(())
    }

    /// Advance the system by one accepted step of at most `target`, never
    /// beyond `max_remaining`. Returns the step actually taken.
    pub fn integration_step(
        &mut self,
        system: &mut SystemState,
        model: &mut dyn CohortModel,
        sink: &mut dyn OutputSink,
        target: f64,
        max_remaining: f64,
        depth: usize,
    ) -> Result<f64> {
        match self.advance(system, model, sink, target, max_remaining, depth) {
            Ok(step) => Ok(step),
            Err(err) => Err(self.fail(system, err)),
        }
    }

    fn fail(&mut self, system: &mut SystemState, err: IntegrationError) -> IntegrationError {
        system.flush_boundary();
        error!(time = ?err.time(), "{err}");
        err
    }

    fn advance(
        &mut self,
        system: &mut SystemState,
        model: &mut dyn CohortModel,
        sink: &mut dyn OutputSink,
        target: f64,
        max_remaining: f64,
        depth: usize,
    ) -> Result<f64> {
        let Self {
            settings,
            log,
            arena,
            solver,
            control,
            events,
            schedule,
            cohort_end,
            located,
            stats,
            ..
        } = self;
        let StateArena {
            layout,
            staging,
            y,
            y_new,
            scratch,
        } = arena;
        let n = layout.system_size;
        let (y, y_new, scratch) = (&mut y[..n], &mut y_new[..n], &mut scratch[..n]);

        let iz = settings.identical_zero;
        let method = solver.method();
        let mut stages = StageEvaluator::new(model, layout, staging);
        let mut target = target;
        let mut depth = depth;
        *located = None;

        let result = loop {
            let (h, adjust) = if method.is_fixed_step() {
                (settings.accuracy.min(max_remaining), false)
            } else {
                clamp_step(target, max_remaining)
            };
            if !method.is_fixed_step() && h < SMALLEST_STEP {
                break Err(IntegrationError::StepTooSmall { time: y[0], step: h });
            }
            log.starting_step(y[0], h, depth);
            if depth == 0 {
                events.start_step(&mut stages, y);
            }

            let mut ctx = StepContext {
                stages: &mut stages,
                log: &mut *log,
                accuracy: settings.accuracy,
                cohort_limit: settings.cohort_limit,
                adjust,
                depth,
            };
            let outcome = match solver.attempt(&mut ctx, control, y, y_new, h) {
                Ok(outcome) => outcome,
                Err(err) => break Err(err),
            };

            match outcome {
                StepOutcome::Rejected { next_step } => {
                    stats.rejected += 1;
                    depth += 1;
                    control.step_failed = true;
                    if depth > MAX_RECURSIONS {
                        break Err(IntegrationError::TooManyRecursions {
                            time: y[0],
                            step: next_step,
                        });
                    }
                    control.step_size = next_step;
                    target = next_step;
                }
                StepOutcome::Accepted => {
                    ctx.log.step_ok(y[0], h, depth);
                    control.step_failed = false;
                    control.accepted_steps += 1;
                    stats.accepted += 1;
                    solver.after_accept(&mut ctx, control, y, y_new, h);

                    if method.has_dense_output() {
                        let pending = events.detect(ctx.stages, y_new, iz);
                        let intermediate = schedule.any_due(y_new[0], iz);
                        if pending > 0 || intermediate {
                            if let Some(dense) = solver.dense_output(&mut ctx, y, y_new, h) {
                                if pending > 0 {
                                    *located = events.locate(ctx.stages, dense, y, y_new, scratch, h, iz, ctx.log);
                                    if located.is_some_and(|event| event.cohort_end) {
                                        *cohort_end = true;
                                    }
                                } else {
                                    events.clear_located();
                                }

                                // Sample every scheduled time inside the (possibly shortened)
                                // step; times before its start are skipped, never extrapolated.
                                while schedule.output_due(y_new[0], iz) {
                                    if schedule.next_output >= y[0] - iz {
                                        dense.interpolate((schedule.next_output - y[0]) / h, scratch);
                                        system.load_flat(scratch);
                                        system.boundary_to_output();
                                        sink.file_out(system);
                                    }
                                    schedule.next_output += schedule.output_interval;
                                }
                                while schedule.state_output_due(y_new[0], iz) {
                                    if schedule.next_state_output >= y[0] - iz {
                                        dense.interpolate((schedule.next_state_output - y[0]) / h, scratch);
                                        system.load_flat(scratch);
                                        system.boundary_to_output();
                                        sink.file_state(system);
                                    }
                                    schedule.next_state_output += schedule.state_output_interval;
                                }
                            }
                        } else {
                            events.clear_located();
                        }
                    }

                    system.load_flat(y_new);
                    y.copy_from_slice(y_new);
                    break Ok(h);
                }
            }
        };

        stats.function_evaluations += stages.evaluations();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::run_cohort_cycle;
    use crate::layout::{DerivativeView, StateView, Staging};
    use crate::population::Population;
    use crate::settings::IntegrationMethod;
    use crate::traits::NullSink;

    /// `dN/dt = -N` for every cohort; boundary cohorts are left unchanged.
    struct Decay;

    impl CohortModel for Decay {
        fn gradient(&mut self, state: &StateView<'_>, derivative: &mut DerivativeView<'_>, _staging: &Staging) {
            for i in 0..state.cohort_count(0) {
                derivative.cohort_mut(0, i)[0] = -state.cohort(0, i)[0];
                derivative.cohort_mut(0, i)[1] = 0.0;
            }
            for j in 0..state.boundary_count(0) {
                derivative.boundary_mut(0, j).fill(0.0);
            }
        }
    }

    /// One cohort whose size grows at rate 100 from 20; matures at size 50.
    struct Maturation {
        closes: bool,
        closures_asked: usize,
    }

    impl CohortModel for Maturation {
        fn gradient(&mut self, _state: &StateView<'_>, derivative: &mut DerivativeView<'_>, _staging: &Staging) {
            let cohort = derivative.cohort_mut(0, 0);
            cohort[0] = 0.0;
            cohort[1] = 100.0;
        }

        fn event_count(&self) -> usize {
            1
        }

        fn event_location(&mut self, state: &StateView<'_>, _staging: &Staging, indicators: &mut [f64]) {
            indicators[0] = state.cohort(0, 0)[1] - 50.0;
        }

        fn force_cohort_end(&mut self, _state: &StateView<'_>, _staging: &Staging) -> bool {
            self.closures_asked += 1;
            self.closes
        }
    }

    /// Records the time and first boundary record of every output call.
    #[derive(Default)]
    struct Recorder {
        outputs: Vec<(f64, Vec<f64>)>,
        sizes: Vec<f64>,
        states: usize,
    }

    impl OutputSink for Recorder {
        fn file_out(&mut self, system: &SystemState) {
            let pop = &system.populations[0];
            let boundary = if pop.boundary_count > 0 {
                pop.boundary(0).to_vec()
            } else {
                Vec::new()
            };
            self.outputs.push((system.time(), boundary));
            if pop.cohort_count > 0 {
                self.sizes.push(pop.cohort(0)[0]);
            }
        }

        fn file_state(&mut self, _system: &SystemState) {
            self.states += 1;
        }
    }

    /// Rejects every attempt, proposing a slightly smaller step.
    struct AlwaysReject {
        attempts: usize,
        shrink: f64,
    }

    impl Integrator for AlwaysReject {
        fn method(&self) -> IntegrationMethod {
            IntegrationMethod::CashKarp
        }

        fn prepare_cycle(&mut self, _size: usize, _control: &mut StepControl) -> Result<()> {
            Ok(())
        }

        fn attempt(
            &mut self,
            _ctx: &mut StepContext<'_, '_>,
            _control: &mut StepControl,
            _y: &[f64],
            _y_new: &mut [f64],
            h: f64,
        ) -> Result<StepOutcome> {
            self.attempts += 1;
            Ok(StepOutcome::Rejected {
                next_step: h * self.shrink,
            })
        }
    }

    fn decay_system() -> SystemState {
        SystemState::new(vec![0.0]).with_population(Population::with_cohorts(2, &[vec![100.0, 1.0]]))
    }

    fn staged_system() -> SystemState {
        let mut pop = Population::with_cohorts(2, &[vec![100.0, 1.0]]);
        pop.push_boundary(&[10.0, 5.0], &[0.0, 2.0]);
        SystemState::new(vec![0.0]).with_population(pop)
    }

    fn settings(method: IntegrationMethod) -> IntegratorSettings {
        IntegratorSettings {
            method,
            ..IntegratorSettings::default()
        }
    }

    #[test]
    fn exponential_decay_over_one_cycle() {
        let expected = 100.0 * (-1.0f64).exp();
        for (method, tolerance) in [
            (IntegrationMethod::CashKarp, 1e-4),
            (IntegrationMethod::Rkf45, 1e-4),
            (IntegrationMethod::Dopri5, 1e-4),
            (IntegrationMethod::Dopri8, 1e-4),
            (IntegrationMethod::Radau5, 1e-3),
        ] {
            let mut core = IntegrationCore::new(settings(method), 0).expect("valid settings");
            let mut system = decay_system();
            let report =
                run_cohort_cycle(&mut core, &mut system, &mut Decay, &mut NullSink, 1.0).expect("cycle completes");
            let n = system.populations[0].cohort(0)[0];
            assert!((n - expected).abs() < tolerance, "{method:?}: N = {n}");
            assert!((system.time() - 1.0).abs() < 1e-12, "{method:?}: T = {}", system.time());
            assert!(report.steps > 0);
            assert!(!report.cohort_end);
        }
    }

    #[test]
    fn fixed_step_methods_use_accuracy_as_step() {
        let expected = 100.0 * (-1.0f64).exp();
        for method in [IntegrationMethod::Rk4, IntegrationMethod::Rk2] {
            let config = IntegratorSettings {
                accuracy: 0.01,
                ..settings(method)
            };
            let mut core = IntegrationCore::new(config, 0).expect("valid settings");
            let mut system = decay_system();
            let report =
                run_cohort_cycle(&mut core, &mut system, &mut Decay, &mut NullSink, 1.0).expect("cycle completes");
            assert_eq!(report.steps, 100, "{method:?}");
            let n = system.populations[0].cohort(0)[0];
            assert!((n - expected).abs() < 1e-2, "{method:?}: N = {n}");
        }
    }

    #[test]
    fn maturation_event_closes_cycle() {
        let mut model = Maturation {
            closes: true,
            closures_asked: 0,
        };
        let mut core = IntegrationCore::new(settings(IntegrationMethod::CashKarp), model.event_count())
            .expect("valid settings");
        assert_eq!(core.solver().method(), IntegrationMethod::Dopri5);

        let mut system = SystemState::new(vec![0.0]).with_population(Population::with_cohorts(2, &[vec![1.0, 20.0]]));
        let report = run_cohort_cycle(&mut core, &mut system, &mut model, &mut NullSink, 1.0).expect("cycle completes");

        assert!(report.cohort_end);
        assert!(core.cohort_end());
        assert!((system.time() - 0.3).abs() < 1e-8, "T = {}", system.time());
        assert!((system.populations[0].cohort(0)[1] - 50.0).abs() < 1e-6);
        let event = core.located_event().expect("event recorded");
        assert_eq!(event.index, 0);
        assert!(event.cohort_end);
        assert!(event.fraction > 0.0 && event.fraction < 1.0);
        assert_eq!(model.closures_asked, 1);
    }

    #[test]
    fn open_event_is_located_once_and_cycle_continues() {
        let mut model = Maturation {
            closes: false,
            closures_asked: 0,
        };
        let mut core = IntegrationCore::new(settings(IntegrationMethod::Dopri5), 1).expect("valid settings");
        let mut system = SystemState::new(vec![0.0]).with_population(Population::with_cohorts(2, &[vec![1.0, 20.0]]));
        let report = run_cohort_cycle(&mut core, &mut system, &mut model, &mut NullSink, 1.0).expect("cycle completes");

        assert!(!report.cohort_end);
        assert!((system.time() - 1.0).abs() < 1e-12);
        assert!((system.populations[0].cohort(0)[1] - 120.0).abs() < 1e-6);
        assert_eq!(model.closures_asked, 1);
    }

    #[test]
    fn recursion_bound_allows_exactly_twenty_five_retries() {
        let solver = AlwaysReject {
            attempts: 0,
            shrink: 0.95,
        };
        let mut core = IntegrationCore::with_solver(IntegratorSettings::default(), solver, 0);
        let mut system = staged_system();
        core.prepare_cycle(&mut system, &Decay).expect("prepare");

        let err = core
            .integration_step(&mut system, &mut Decay, &mut NullSink, 0.1, 1.0, 0)
            .unwrap_err();
        assert!(matches!(err, IntegrationError::TooManyRecursions { .. }), "{err}");
        assert_eq!(core.solver().attempts, MAX_RECURSIONS + 1);
        assert_eq!(core.statistics().rejected, MAX_RECURSIONS + 1);

        // Staged boundary cohorts were flushed before the error surfaced.
        let pop = &system.populations[0];
        assert_eq!(pop.boundary_count, 0);
        assert_eq!(pop.cohort(1), &[10.0, 2.5]);
    }

    #[test]
    fn collapsing_step_is_fatal() {
        let solver = AlwaysReject {
            attempts: 0,
            shrink: 1.0e-4,
        };
        let mut core = IntegrationCore::with_solver(IntegratorSettings::default(), solver, 0);
        let mut system = decay_system();
        core.prepare_cycle(&mut system, &Decay).expect("prepare");
        let err = core
            .integration_step(&mut system, &mut Decay, &mut NullSink, 0.1, 1.0, 0)
            .unwrap_err();
        assert!(matches!(err, IntegrationError::StepTooSmall { .. }), "{err}");
        assert_eq!(core.solver().attempts, 3);
    }

    #[test]
    fn clamped_step_does_not_grow_controller() {
        let mut core = IntegrationCore::new(settings(IntegrationMethod::CashKarp), 0).expect("valid settings");
        let mut system = decay_system();
        core.prepare_cycle(&mut system, &Decay).expect("prepare");
        core.set_step_size(0.04);

        let taken = core
            .integration_step(&mut system, &mut Decay, &mut NullSink, 0.04, 0.06, 0)
            .expect("step");
        assert!((taken - 0.03).abs() < 1e-15);
        assert!(taken <= 0.06);
        assert_eq!(core.step_size(), 0.04);

        // Unclamped steps may grow again.
        core.integration_step(&mut system, &mut Decay, &mut NullSink, 0.04, 1.0, 0)
            .expect("step");
        assert!(core.step_size() > 0.04);
    }

    #[test]
    fn intermediate_output_samples_each_interval() {
        let config = IntegratorSettings {
            output_interval: 0.1,
            state_output_interval: 0.25,
            ..settings(IntegrationMethod::Dopri5)
        };
        let mut core = IntegrationCore::new(config, 0).expect("valid settings");
        let mut system = staged_system();
        let mut sink = Recorder::default();
        run_cohort_cycle(&mut core, &mut system, &mut Decay, &mut sink, 1.0).expect("cycle completes");

        assert_eq!(sink.outputs.len(), 9);
        for (k, (time, boundary)) in sink.outputs.iter().enumerate() {
            assert!((time - 0.1 * (k + 1) as f64).abs() < 1e-9, "sample {k} at {time}");
            // Output sees boundary offsets as means shifted by the reference.
            assert!((boundary[1] - 2.5).abs() < 1e-12);
        }
        assert_eq!(sink.states, 3);
        // The tables hold the raw integrated record again afterwards.
        assert_eq!(system.populations[0].boundary(0), &[10.0, 5.0]);
    }

    #[test]
    fn statistics_count_evaluations_and_steps() {
        let mut core = IntegrationCore::new(settings(IntegrationMethod::Rk4), 0).expect("valid settings");
        core.settings.accuracy = 0.25;
        let mut system = decay_system();
        run_cohort_cycle(&mut core, &mut system, &mut Decay, &mut NullSink, 1.0).expect("cycle completes");
        let stats = core.statistics();
        assert_eq!(stats.accepted, 4);
        assert_eq!(stats.function_evaluations, 16);
        assert_eq!(stats.rejected, 0);
    }

    #[test]
    fn output_grid_is_anchored_at_the_first_cycle() {
        let config = IntegratorSettings {
            output_interval: 0.5,
            ..settings(IntegrationMethod::Dopri5)
        };
        let mut core = IntegrationCore::new(config, 0).expect("valid settings");
        let mut system = SystemState::new(vec![5.0]).with_population(Population::with_cohorts(2, &[vec![100.0, 1.0]]));
        let mut sink = Recorder::default();
        run_cohort_cycle(&mut core, &mut system, &mut Decay, &mut sink, 6.0).expect("first cycle");
        run_cohort_cycle(&mut core, &mut system, &mut Decay, &mut sink, 7.0).expect("second cycle");

        let times: Vec<f64> = sink.outputs.iter().map(|(time, _)| *time).collect();
        assert_eq!(times.len(), 3, "sampled at {times:?}");
        for (k, (time, size)) in times.iter().zip(&sink.sizes).enumerate() {
            let expected = 5.5 + 0.5 * k as f64;
            assert!((time - expected).abs() < 1e-9, "sample {k} at {time}");
            let n = 100.0 * (-(expected - 5.0)).exp();
            assert!((size - n).abs() < 1e-3, "sample {k}: N = {size}, expected {n}");
        }
    }

    #[test]
    fn stale_schedule_is_never_extrapolated() {
        let config = IntegratorSettings {
            output_interval: 0.5,
            ..settings(IntegrationMethod::Dopri5)
        };
        let mut core = IntegrationCore::new(config, 0).expect("valid settings");
        let mut system = SystemState::new(vec![5.0]).with_population(Population::with_cohorts(2, &[vec![100.0, 1.0]]));
        core.prepare_cycle(&mut system, &Decay).expect("prepare");
        let stale = OutputSchedule::starting_at(0.0, core.settings());
        core.set_schedule(stale);

        let mut sink = Recorder::default();
        core.integration_step(&mut system, &mut Decay, &mut sink, 0.2, 1.0, 0)
            .expect("step");

        // Only the grid point at the start of the step is inside it.
        assert_eq!(sink.outputs.len(), 1);
        assert!((sink.outputs[0].0 - 5.0).abs() < 1e-12);
        assert!((sink.sizes[0] - 100.0).abs() < 1e-9);
        assert!(core.schedule().next_output > system.time());
    }

    /// Both cohort slots grow at the same huge rate, so `fac1 I - J` has two
    /// equal rows for every step the controller can propose.
    struct Degenerate;

    impl CohortModel for Degenerate {
        fn gradient(&mut self, state: &StateView<'_>, derivative: &mut DerivativeView<'_>, _staging: &Staging) {
            let cohort = state.cohort(0, 0);
            let rate = 2f64.powi(600) * (cohort[0] + cohort[1]);
            derivative.cohort_mut(0, 0).fill(rate);
            derivative.boundary_mut(0, 0).fill(0.0);
        }
    }

    #[test]
    fn repeated_singular_iteration_matrix_flushes_boundary() {
        let mut pop = Population::with_cohorts(2, &[vec![0.0, 0.0]]);
        pop.push_boundary(&[10.0, 5.0], &[0.0, 2.0]);
        let mut system = SystemState::new(vec![0.0]).with_population(pop);
        let mut core = IntegrationCore::new(settings(IntegrationMethod::Radau5), 0).expect("valid settings");
        core.prepare_cycle(&mut system, &Degenerate).expect("prepare");

        let err = core
            .integration_step(&mut system, &mut Degenerate, &mut NullSink, 0.01, 1.0, 0)
            .unwrap_err();
        assert!(matches!(err, IntegrationError::RepeatedSingularity { .. }), "{err}");
        assert_eq!(core.statistics().singularities, 6);
        assert_eq!(core.statistics().rejected, 5);

        let pop = &system.populations[0];
        assert_eq!(pop.boundary_count, 0);
        assert_eq!(pop.cohort(1), &[10.0, 2.5]);
        assert_eq!(system.time(), 0.0);
    }
}
