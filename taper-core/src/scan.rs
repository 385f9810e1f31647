// vim: tw=80
//! Search a tape changer for a tape that may be written

use crate::{
    changer::{Changer, ChangerCommand, SlotStatus},
    device::TapeDevice,
    label::TapeHeader,
    policy::LabelPolicy,
    tapelist::TapeList,
    types::*
};
use std::{
    cell::Cell,
    ops::ControlFlow,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// A tape chosen by [`taper_scan`], loaded and ready to be opened
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Found {
    pub slot: String,
    pub device: PathBuf,
    /// The tape's current label, or `None` if it is blank and must be labeled
    pub label: Option<String>,
}

/// Open the tape at `path` just long enough to read its label
fn probe<D: TapeDevice>(device: &mut D, path: &Path) -> Result<TapeHeader> {
    device.open(path)?;
    let r = device.read_label();
    device.close()?;
    r
}

/// Find a tape to write.
///
/// The ideal tape is the one at position `tapecycle` in the catalog: the
/// oldest tape that the retention policy allows us to overwrite.  The changer's
/// slots are visited starting from the current one.  If that tape turns up, it
/// is used.  Otherwise the first other reusable tape seen is used instead.  If
/// the changer can't go backwards, or the catalog has no ideal tape, the scan
/// settles for the first reusable tape rather than passing it by.
///
/// On success, the chosen tape is left loaded.
pub fn taper_scan<C, D>(
    changer: &mut Changer<C>,
    device: &mut D,
    catalog: &TapeList,
    policy: &LabelPolicy
) -> Result<Found>
    where C: ChangerCommand,
          D: TapeDevice
{
    let search_label = catalog.at_position(policy.tapecycle())
        .map(|e| e.label.clone());
    let can_reverse = Cell::new(false);
    let mut exact: Option<Found> = None;
    let mut fallback: Option<Found> = None;
    let mut stopped_at_fallback = false;

    if let Some(l) = &search_label {
        info!("searching for label {l}");
    }
    changer.find(
        |nslots, rev| {
            info!(nslots, can_reverse = rev, "scanning changer");
            can_reverse.set(rev);
        },
        |status, slot, rest| {
            if status != SlotStatus::Ok {
                warn!("slot {slot}: {rest}");
                return ControlFlow::Continue(());
            }
            let path = PathBuf::from(rest);
            let label = match probe(device, &path) {
                Ok(hdr) => {
                    info!("slot {slot}: date {} label {}", hdr.datestamp,
                          hdr.label);
                    Some(hdr.label)
                }
                Err(Error::Label(e)) => {
                    info!("slot {slot}: {e}");
                    None
                }
                Err(e) => {
                    warn!("slot {slot}: {e}");
                    return ControlFlow::Continue(());
                }
            };
            let found = Found {
                slot: slot.to_owned(),
                device: path,
                label: label.clone()
            };
            if label.is_some() && label == search_label {
                info!("slot {slot}: exact label match");
                exact = Some(found);
                return ControlFlow::Break(());
            }
            let eligible = match &label {
                Some(l) => policy.reusable(l, catalog),
                None => policy.accepts_blank()
            };
            if eligible && fallback.is_none() {
                info!("slot {slot}: first usable tape");
                fallback = Some(found);
                if !can_reverse.get() || search_label.is_none() {
                    stopped_at_fallback = true;
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        })?;

    if let Some(found) = exact {
        return Ok(found);
    }
    match fallback {
        Some(found) if stopped_at_fallback => Ok(found),
        Some(found) => {
            // The changer has moved on, so go back for it.
            let loaded = changer.load_device(&found.slot)?;
            Ok(Found { slot: loaded.slot, device: loaded.device, ..found })
        }
        None => {
            let msg = match search_label {
                Some(l) => format!("label {l} or new tape not found in rack"),
                None => "new tape not found in rack".to_owned()
            };
            Err(Error::NoTape(msg))
        }
    }
}
