// vim: tw=80
//! Which tapes may be overwritten, and what to call new ones

use crate::{tapelist::TapeList, types::*};
use regex::Regex;

#[derive(Clone, Debug)]
pub struct LabelPolicy {
    /// A reusable tape's label must match this
    labelstr: Regex,
    /// Number of most recently used tapes that are protected from overwrite
    tapecycle: usize,
    /// Template for labeling blank tapes.  Each run of `%` is replaced by a
    /// zero-padded sequence number.  If unset, blank tapes are refused.
    autolabel: Option<String>,
}

impl LabelPolicy {
    pub fn new(labelstr: &str, tapecycle: usize, autolabel: Option<String>)
        -> Result<Self>
    {
        let labelstr = Regex::new(labelstr)
            .map_err(|e| Error::Config(format!("labelstr: {e}")))?;
        Ok(LabelPolicy { labelstr, tapecycle, autolabel })
    }

    /// May blank or unreadable tapes be labeled and used?
    pub fn accepts_blank(&self) -> bool {
        self.autolabel.is_some()
    }

    /// Check whether the tape labeled `label` may be overwritten.
    ///
    /// Returns the reason for refusal, if any.
    pub fn check(&self, label: &str, catalog: &TapeList) -> Result<()> {
        self.require_match(label)?;
        if catalog.is_active(label, self.tapecycle) {
            return Err(Error::Label(format!(
                "cannot overwrite active tape {label}")));
        }
        Ok(())
    }

    pub fn matches(&self, label: &str) -> bool {
        self.labelstr.is_match(label)
    }

    /// Choose a label for a blank tape: the lowest-numbered expansion of the
    /// autolabel template that isn't already in the catalog.
    pub fn new_label(&self, catalog: &TapeList) -> Result<String> {
        let template = self.autolabel.as_deref()
            .ok_or_else(|| Error::Label(
                    "blank tape, and no autolabel template".to_owned()))?;
        let start = template.find('%');
        let width = template.chars().filter(|c| *c == '%').count();
        let candidates: Box<dyn Iterator<Item=String>> = match start {
            None => Box::new(std::iter::once(template.to_owned())),
            Some(start) => {
                let prefix = &template[..start];
                let suffix = &template[start + width..];
                let limit = 10u64.saturating_pow(width as u32);
                Box::new((1..limit).map(move |n| {
                    format!("{prefix}{n:0width$}{suffix}")
                }))
            }
        };
        for label in candidates {
            if catalog.lookup(&label).is_none() {
                if !self.matches(&label) {
                    return Err(Error::Config(format!(
                        "autolabel {label} doesn't match labelstr \"{}\"",
                        self.labelstr.as_str())));
                }
                return Ok(label);
            }
        }
        Err(Error::Label(format!("autolabel template {template} is exhausted")))
    }

    /// Fail unless `label` matches labelstr
    pub fn require_match(&self, label: &str) -> Result<()> {
        if self.labelstr.is_match(label) {
            Ok(())
        } else {
            Err(Error::Label(format!(
                "label {label} doesn't match labelstr \"{}\"",
                self.labelstr.as_str())))
        }
    }

    pub fn reusable(&self, label: &str, catalog: &TapeList) -> bool {
        self.check(label, catalog).is_ok()
    }

    /// The retention cycle length
    pub fn tapecycle(&self) -> usize {
        self.tapecycle
    }
}
