//! Host callbacks: how the entity folds entries into its view.

use crate::error::UpdateViewError;

/// Host-provided logic that applies one log entry to a view.
///
/// The engine calls this to build tentative views, to replay the log after a
/// read, and to apply entries carried by notifications. Failures are logged
/// and the entry is skipped; they never disturb protocol state.
///
/// Any `Fn(&mut V, &E) -> Result<(), UpdateViewError>` closure is a
/// `ViewUpdater`.
pub trait ViewUpdater<V, E> {
    /// Apply `entry` to `view`.
    fn update_view(&self, view: &mut V, entry: &E) -> Result<(), UpdateViewError>;

    /// Called after the tentative and/or confirmed view changed.
    fn on_view_changed(&self, _tentative: bool, _confirmed: bool) -> Result<(), UpdateViewError> {
        Ok(())
    }
}

impl<V, E, F> ViewUpdater<V, E> for F
where
    F: Fn(&mut V, &E) -> Result<(), UpdateViewError>,
{
    fn update_view(&self, view: &mut V, entry: &E) -> Result<(), UpdateViewError> {
        self(view, entry)
    }
}

/// Apply `entries` in order, logging and skipping the ones that fail.
pub(crate) fn apply_entries<'a, V, E: 'a>(
    updater: &dyn ViewUpdater<V, E>,
    view: &mut V,
    entries: impl IntoIterator<Item = &'a E>,
    context: &'static str,
) {
    for entry in entries {
        if let Err(e) = updater.update_view(view, entry) {
            tracing::warn!(context, error = %e, "caught user code error in update_view");
        }
    }
}

/// Notify the host of view changes, logging a failing callback.
pub(crate) fn notify_view_changed<V, E>(
    updater: &dyn ViewUpdater<V, E>,
    tentative: bool,
    confirmed: bool,
    context: &'static str,
) {
    if let Err(e) = updater.on_view_changed(tentative, confirmed) {
        tracing::warn!(context, error = %e, "caught user code error in on_view_changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failing_entry_is_skipped() {
        let updater = |view: &mut Vec<i32>, entry: &i32| {
            if *entry < 0 {
                return Err(UpdateViewError::new("negative"));
            }
            view.push(*entry);
            Ok(())
        };
        let mut view = Vec::new();
        apply_entries(&updater, &mut view, &[1, -2, 3], "test");
        assert_eq!(view, vec![1, 3]);
    }
}
