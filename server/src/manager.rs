//! Per-user sidebar state and the refresh loop that keeps it current
//!
//! The manager owns one [`UserSidebarState`] per user with a visible sidebar:
//! - Explicit enable/disable/toggle write the persisted preference and then
//!   build or tear down the surface
//! - A periodic tick re-renders every enabled user, touching a surface only
//!   when its resolved content actually changed
//! - Join, quit and location-change events reconcile live state against the
//!   stored preference and the world blacklist
//! - Configuration reloads swap the snapshot, drop every render cache and
//!   redraw
//!
//! State lives in a concurrent map so event callbacks from other threads can
//! race the tick safely. Calls for one user are expected to be serialized by
//! the caller.

use crate::error::{Result, SidebarError};
use crate::render;
use crate::resolver::TemplateResolver;
use crate::roster::Roster;
use crate::surface::{DisplaySlot, Surface, SurfaceHost, OBJECTIVE_NAME};
use dashmap::DashMap;
use log::{debug, info, warn};
use shared::{
    ticks_to_duration, translate_markup, ConfigSource, PreferenceStore, SessionUser,
    SidebarConfig, UserId, JOIN_GRACE_TICKS,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// How often the configuration source is asked for changes.
pub const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Live sidebar of one user
///
/// The surface is owned exclusively; dropping the state discards it.
pub struct UserSidebarState {
    pub user_id: UserId,
    surface: Box<dyn Surface>,
    /// Title last written to the surface
    last_title: Option<String>,
    /// Lines last written to the surface, `None` until the first render
    last_rendered_lines: Option<Vec<String>>,
}

impl UserSidebarState {
    fn new(user_id: UserId, surface: Box<dyn Surface>, title: String) -> Self {
        Self {
            user_id,
            surface,
            last_title: Some(title),
            last_rendered_lines: None,
        }
    }

    fn clear_cache(&mut self) {
        self.last_title = None;
        self.last_rendered_lines = None;
    }
}

#[derive(Default)]
struct Lifecycle {
    running: bool,
    /// Bumped on every initialize so tasks from an older run stand down
    generation: u64,
    runtime: Option<Handle>,
    tasks: Vec<JoinHandle<()>>,
}

impl Lifecycle {
    fn is_current(&self, generation: u64) -> bool {
        self.running && self.generation == generation
    }
}

/// Owns every user's sidebar and the tasks that refresh them
pub struct SidebarManager {
    config_source: Arc<dyn ConfigSource>,
    store: Arc<dyn PreferenceStore>,
    host: Arc<dyn SurfaceHost>,
    resolver: Option<Arc<dyn TemplateResolver>>,
    /// Result of probing the resolver at initialize
    resolver_active: AtomicBool,
    config: RwLock<Arc<SidebarConfig>>,
    roster: Arc<Roster>,
    states: DashMap<UserId, UserSidebarState>,
    lifecycle: Mutex<Lifecycle>,
    self_ref: Weak<SidebarManager>,
}

/// Collects the collaborators of a [`SidebarManager`]
pub struct SidebarManagerBuilder {
    config_source: Arc<dyn ConfigSource>,
    store: Arc<dyn PreferenceStore>,
    host: Arc<dyn SurfaceHost>,
    resolver: Option<Arc<dyn TemplateResolver>>,
    roster: Option<Arc<Roster>>,
}

impl SidebarManagerBuilder {
    pub fn resolver(mut self, resolver: Arc<dyn TemplateResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Shares an existing roster, e.g. with placeholder providers
    pub fn roster(mut self, roster: Arc<Roster>) -> Self {
        self.roster = Some(roster);
        self
    }

    pub fn build(self) -> Arc<SidebarManager> {
        Arc::new_cyclic(|self_ref| SidebarManager {
            config_source: self.config_source,
            store: self.store,
            host: self.host,
            resolver: self.resolver,
            resolver_active: AtomicBool::new(false),
            config: RwLock::new(Arc::new(SidebarConfig::default())),
            roster: self.roster.unwrap_or_default(),
            states: DashMap::new(),
            lifecycle: Mutex::new(Lifecycle::default()),
            self_ref: self_ref.clone(),
        })
    }
}

impl SidebarManager {
    pub fn builder(
        config_source: Arc<dyn ConfigSource>,
        store: Arc<dyn PreferenceStore>,
        host: Arc<dyn SurfaceHost>,
    ) -> SidebarManagerBuilder {
        SidebarManagerBuilder {
            config_source,
            store,
            host,
            resolver: None,
            roster: None,
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Loads configuration, starts the refresh tasks and builds sidebars for
    /// everyone already connected who has them enabled
    ///
    /// Must be called from within a tokio runtime. Calling it while already
    /// running does nothing.
    pub fn initialize(&self) -> Result<()> {
        self.start(None)
    }

    /// Starts against `snapshot`, or a fresh load from the source when `None`
    fn start(&self, snapshot: Option<SidebarConfig>) -> Result<()> {
        let config = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.running {
                debug!("Sidebar manager already running");
                return Ok(());
            }

            let runtime = Handle::try_current().map_err(|_| SidebarError::NoRuntime)?;
            let config = match snapshot {
                Some(config) => Arc::new(config),
                None => Arc::new(self.config_source.load()?),
            };
            self.set_config(Arc::clone(&config));

            let available = self.resolver.as_ref().is_some_and(|r| r.is_available());
            self.resolver_active.store(available, Ordering::SeqCst);
            if !available {
                warn!("Template resolver not found! Placeholders will not be expanded.");
            }

            lifecycle.generation += 1;
            lifecycle.running = true;
            let generation = lifecycle.generation;

            lifecycle
                .tasks
                .push(self.spawn_config_watcher(&runtime, generation));
            if config.enabled {
                lifecycle
                    .tasks
                    .push(self.spawn_tick(&runtime, config.update_period(), generation));
            }
            lifecycle.runtime = Some(runtime);
            config
        };

        for user in self.roster.users() {
            match self.persisted_enabled(&config, &user.id) {
                Ok(true) => {
                    if let Err(e) = self.enable_sidebar(&user) {
                        warn!("Failed to enable sidebar for {}: {}", user.id, e);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to read sidebar preference for {}: {}", user.id, e),
            }
        }

        info!(
            "Sidebar manager started ({} lines, every {} ticks)",
            config.lines.len(),
            config.update_interval
        );
        Ok(())
    }

    /// Stops the refresh tasks and puts every user back on the default display
    ///
    /// No tick runs after this returns. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let mut lifecycle = self.lifecycle();
        let was_running = lifecycle.running;
        lifecycle.running = false;
        lifecycle.runtime = None;
        for task in lifecycle.tasks.drain(..) {
            task.abort();
        }

        let active: Vec<UserId> = self.states.iter().map(|e| e.key().clone()).collect();
        for user_id in &active {
            self.remove_sidebar(user_id);
        }
        self.states.clear();

        if was_running {
            info!("Sidebar manager stopped ({} sidebars removed)", active.len());
        }
    }

    /// Full restart against a freshly loaded configuration
    pub fn reload(&self) -> Result<()> {
        info!("Reloading sidebar manager");
        self.shutdown();
        self.initialize()
    }

    /// Asks the configuration source for changes and applies them
    ///
    /// Returns true if a new snapshot was applied. A snapshot that fails to
    /// load is ignored and the current one stays in force.
    pub fn poll_config(&self) -> bool {
        match self.config_source.poll_change() {
            None => false,
            Some(Ok(config)) => match self.apply_config(config) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to apply reloaded sidebar config: {}", e);
                    false
                }
            },
            Some(Err(e)) => {
                warn!("Ignoring invalid sidebar config change: {}", e);
                false
            }
        }
    }

    /// Swaps in a new configuration snapshot, drops all render caches and
    /// redraws every active sidebar
    ///
    /// A change to the kill switch or the refresh period needs a new tick
    /// task, so the manager is restarted with the given snapshot.
    pub fn apply_config(&self, config: SidebarConfig) -> Result<()> {
        config.validate()?;

        let current = self.config();
        if current.enabled != config.enabled || current.update_interval != config.update_interval {
            info!("Restarting sidebar manager for new tick settings");
            self.shutdown();
            return self.start(Some(config));
        }

        self.set_config(Arc::new(config));
        self.clear_cache();
        self.refresh_all();
        info!("Sidebar config reloaded");
        Ok(())
    }

    /// Forgets what every sidebar last showed so the next update redraws it
    pub fn clear_cache(&self) {
        for mut state in self.states.iter_mut() {
            state.clear_cache();
        }
    }

    fn refresh_all(&self) {
        let config = self.config();
        let active: Vec<UserId> = self.states.iter().map(|e| e.key().clone()).collect();

        for user_id in active {
            let Some(user) = self.roster.get(&user_id) else {
                continue;
            };
            if config.is_blacklisted(&user.location) {
                self.remove_sidebar(&user_id);
            } else {
                self.update_sidebar(&user);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Enable / disable / toggle
    // ---------------------------------------------------------------------

    /// Opts the user in and shows their sidebar unless their world is
    /// blacklisted
    ///
    /// The preference is written before the blacklist check, so opting in
    /// sticks even while the sidebar is suppressed. Any existing surface is
    /// discarded and replaced.
    pub fn enable_sidebar(&self, user: &SessionUser) -> Result<()> {
        let config = self.config();
        if !config.enabled {
            return Ok(());
        }

        self.set_persisted(&user.id, true)?;

        if config.is_blacklisted(&user.location) {
            debug!(
                "Not showing sidebar for {} in blacklisted world {}",
                user.id, user.location
            );
            return Ok(());
        }

        let title = translate_markup(&config.title);
        let mut surface = self.host.create_surface(&user.id);
        surface.register_objective(OBJECTIVE_NAME, &title, DisplaySlot::Sidebar)?;
        self.host.show(&user.id, surface.as_ref());

        let state = UserSidebarState::new(user.id.clone(), surface, title);
        if self.states.insert(user.id.clone(), state).is_some() {
            debug!("Replaced existing sidebar for {}", user.id);
        }

        self.update_sidebar(user);
        info!("Sidebar enabled for {}", user.name);
        Ok(())
    }

    /// Opts the user out and removes their sidebar
    pub fn disable_sidebar(&self, user: &SessionUser) -> Result<()> {
        self.set_persisted(&user.id, false)?;
        self.remove_sidebar(&user.id);
        info!("Sidebar disabled for {}", user.name);
        Ok(())
    }

    /// Flips the stored preference, returning true if it is now enabled
    ///
    /// The decision follows the persisted flag, not whether a surface is
    /// currently visible, so in a blacklisted world this can disagree with
    /// [`is_sidebar_enabled`](Self::is_sidebar_enabled).
    pub fn toggle_sidebar(&self, user: &SessionUser) -> Result<bool> {
        let config = self.config();
        if self.persisted_enabled(&config, &user.id)? {
            self.disable_sidebar(user)?;
            Ok(false)
        } else {
            self.enable_sidebar(user)?;
            Ok(true)
        }
    }

    /// Whether the user should currently see a sidebar
    ///
    /// Reads the store on every call.
    pub fn is_sidebar_enabled(&self, user: &SessionUser) -> Result<bool> {
        let config = self.config();
        self.is_enabled_with(&config, user)
    }

    fn is_enabled_with(&self, config: &SidebarConfig, user: &SessionUser) -> Result<bool> {
        Ok(config.enabled
            && self.persisted_enabled(config, &user.id)?
            && !config.is_blacklisted(&user.location))
    }

    /// Tears down the user's live sidebar, if any
    ///
    /// Returns true if a sidebar was removed. The preference is untouched.
    pub fn remove_sidebar(&self, user_id: &UserId) -> bool {
        if self.states.remove(user_id).is_some() {
            self.host.show_default(user_id);
            debug!("Removed sidebar for {}", user_id);
            true
        } else {
            false
        }
    }

    // ---------------------------------------------------------------------
    // Preference store
    // ---------------------------------------------------------------------

    fn persisted_enabled(&self, config: &SidebarConfig, user_id: &UserId) -> Result<bool> {
        Ok(match self.store.find_by_user(user_id)? {
            Some(record) => record.enabled,
            None => config.default_enabled,
        })
    }

    fn set_persisted(&self, user_id: &UserId, enabled: bool) -> Result<()> {
        match self.store.find_by_user(user_id)? {
            Some(record) => self.store.update_enabled(record.id, enabled)?,
            None => {
                self.store.insert(user_id, enabled)?;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Rendering
    // ---------------------------------------------------------------------

    /// Re-renders the user's sidebar if its content changed
    ///
    /// Users without a live sidebar are ignored. Nothing on the surface is
    /// written when the resolved title and lines match what it already shows.
    pub fn update_sidebar(&self, user: &SessionUser) {
        let config = self.config();
        let Some(mut state) = self.states.get_mut(&user.id) else {
            return;
        };
        let resolver = self.active_resolver();
        let resolver = resolver.as_deref();

        match render::render_title(resolver, user, &config.title) {
            Ok(title) if state.last_title.as_deref() != Some(title.as_str()) => {
                match state.surface.set_title(&title) {
                    Ok(()) => state.last_title = Some(title),
                    Err(e) => debug!("Keeping previous title for {}: {}", user.id, e),
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Keeping previous title for {}: {}", user.id, e),
        }

        if config.lines.is_empty() {
            return;
        }

        let lines = render::render_lines(resolver, user, &config.lines);
        if state.last_rendered_lines.as_ref() == Some(&lines) {
            return;
        }

        render::apply_lines(state.surface.as_mut(), &lines);
        state.last_rendered_lines = Some(lines);
    }

    /// One refresh pass over every connected user
    pub fn tick(&self) {
        let config = self.config();
        if !config.enabled {
            return;
        }

        for user in self.roster.users() {
            match self.is_enabled_with(&config, &user) {
                Ok(true) => self.update_sidebar(&user),
                Ok(false) => {}
                Err(e) => warn!("Skipping sidebar refresh for {}: {}", user.id, e),
            }
        }
    }

    // ---------------------------------------------------------------------
    // Host events
    // ---------------------------------------------------------------------

    /// A user connected
    ///
    /// If they have the sidebar enabled it is built after a short grace delay
    /// so other systems can populate their placeholders first.
    pub fn on_join(&self, user: SessionUser) -> Result<()> {
        self.roster.add_user(user.clone());

        let config = self.config();
        if !self.persisted_enabled(&config, &user.id)? {
            return Ok(());
        }

        let lifecycle = self.lifecycle();
        let (Some(runtime), true) = (lifecycle.runtime.clone(), lifecycle.running) else {
            return Ok(());
        };
        let generation = lifecycle.generation;
        drop(lifecycle);

        let manager = self.self_ref.clone();
        let user_id = user.id;
        runtime.spawn(async move {
            sleep(ticks_to_duration(JOIN_GRACE_TICKS)).await;
            if let Some(strong) = manager.upgrade() {
                strong.run_delayed_join(generation, &user_id);
            }
        });
        Ok(())
    }

    fn run_delayed_join(&self, generation: u64, user_id: &UserId) {
        // Held so a concurrent shutdown cannot slip in before the enable.
        let lifecycle = self.lifecycle();
        if !lifecycle.is_current(generation) {
            return;
        }
        // The user may have left during the grace delay.
        let Some(user) = self.roster.get(user_id) else {
            return;
        };
        if let Err(e) = self.enable_sidebar(&user) {
            warn!("Failed to enable sidebar for {}: {}", user_id, e);
        }
        // A quit that landed during the enable removed the roster entry before
        // its state cleanup, so this check catches whatever that cleanup missed.
        if !self.roster.contains(user_id) && self.states.remove(user_id).is_some() {
            debug!("Dropped sidebar of {} who left while it was being built", user_id);
        }
    }

    /// A user disconnected. Their preference is left as it is.
    pub fn on_quit(&self, user_id: &UserId) {
        self.roster.remove_user(user_id);
        self.states.remove(user_id);
    }

    /// A user moved to another world
    pub fn on_location_change(&self, user_id: &UserId, location: &str) -> Result<()> {
        let Some(user) = self.roster.set_location(user_id, location) else {
            return Ok(());
        };

        let config = self.config();
        if config.is_blacklisted(location) {
            self.remove_sidebar(user_id);
        } else if self.is_enabled_with(&config, &user)? && !self.states.contains_key(user_id) {
            self.enable_sidebar(&user)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Background tasks
    // ---------------------------------------------------------------------

    fn spawn_tick(&self, runtime: &Handle, period: Duration, generation: u64) -> JoinHandle<()> {
        let manager = self.self_ref.clone();
        runtime.spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                timer.tick().await;
                let Some(strong) = manager.upgrade() else {
                    break;
                };
                if !strong.run_scheduled_tick(generation) {
                    break;
                }
            }
        })
    }

    fn run_scheduled_tick(&self, generation: u64) -> bool {
        // Held for the whole pass so shutdown waits for it to finish.
        let lifecycle = self.lifecycle();
        if !lifecycle.is_current(generation) {
            return false;
        }
        self.tick();
        true
    }

    fn spawn_config_watcher(&self, runtime: &Handle, generation: u64) -> JoinHandle<()> {
        let manager = self.self_ref.clone();
        runtime.spawn(async move {
            let mut timer = interval(CONFIG_POLL_INTERVAL);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately, right after the initial load.
            timer.tick().await;

            loop {
                timer.tick().await;
                let Some(strong) = manager.upgrade() else {
                    break;
                };
                if !strong.lifecycle().is_current(generation) {
                    break;
                }
                strong.poll_config();
            }
        })
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn config(&self) -> Arc<SidebarConfig> {
        match self.config.read() {
            Ok(config) => Arc::clone(&config),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn set_config(&self, config: Arc<SidebarConfig>) {
        match self.config.write() {
            Ok(mut current) => *current = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn active_resolver(&self) -> Option<Arc<dyn TemplateResolver>> {
        if self.resolver_active.load(Ordering::SeqCst) {
            self.resolver.clone()
        } else {
            None
        }
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle().running
    }

    pub fn resolver_active(&self) -> bool {
        self.resolver_active.load(Ordering::SeqCst)
    }

    pub fn has_sidebar(&self, user_id: &UserId) -> bool {
        self.states.contains_key(user_id)
    }

    pub fn active_count(&self) -> usize {
        self.states.len()
    }

    /// Lines the user's surface last received, if any
    pub fn cached_lines(&self, user_id: &UserId) -> Option<Vec<String>> {
        self.states.get(user_id)?.last_rendered_lines.clone()
    }
}
