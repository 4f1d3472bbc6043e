//! Request, result and confirmation types shared by every transport
//!
//! Field names on the wire follow the deployed JSON contract; the Rust side
//! uses English names through `serde(rename)`.

use crate::core::pool::{AllocationOutcome, ReleaseError, ResourcePool};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Summary text sent when nothing could be granted
pub const DENIED_SUMMARY: &str =
    "[ALERTA] No hay suficientes aulas o laboratorios para responder a la demanda";

/// Resource request issued by an academic program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "facultad")]
    pub faculty: String,
    #[serde(rename = "programa")]
    pub program: String,
    #[serde(rename = "semestre")]
    pub semester: u32,
    #[serde(rename = "numSalones")]
    pub classrooms: u32,
    #[serde(rename = "numLaboratorios")]
    pub labs: u32,
}

impl Request {
    pub fn new(
        faculty: impl Into<String>,
        program: impl Into<String>,
        semester: u32,
        classrooms: u32,
        labs: u32,
    ) -> Self {
        Self {
            faculty: faculty.into(),
            program: program.into(),
            semester,
            classrooms,
            labs,
        }
    }
}

/// Two-valued meaning of an allocation, independent of its summary text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Summary {
    /// Labs and classrooms granted as asked
    Granted,
    /// Granted, part of the labs as mobile classrooms
    GrantedWithConversion,
    Denied,
}

impl Summary {
    pub fn of(outcome: &AllocationOutcome) -> Self {
        if outcome.is_denied() {
            Summary::Denied
        } else if outcome.has_conversion() {
            Summary::GrantedWithConversion
        } else {
            Summary::Granted
        }
    }

    pub fn message(&self, program: &str) -> String {
        match self {
            Summary::Granted => format!(
                "Asignacion exitosa de laboratorios y salones para {}",
                program
            ),
            Summary::GrantedWithConversion => format!(
                "Asignacion exitosa para {}, algunos laboratorios se asignaron como aulas moviles",
                program
            ),
            Summary::Denied => DENIED_SUMMARY.to_string(),
        }
    }

    #[inline]
    pub fn is_denied(&self) -> bool {
        matches!(self, Summary::Denied)
    }
}

/// Wire form of an `AllocationOutcome`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    #[serde(rename = "infoGeneral")]
    pub summary: String,
    #[serde(rename = "labsAsignados")]
    pub labs: u32,
    #[serde(rename = "aulaMovilAsignadas")]
    pub mobile_classrooms: u32,
    #[serde(rename = "salonesAsignados")]
    pub classrooms: u32,
}

impl AllocationResult {
    pub fn from_outcome(outcome: AllocationOutcome, program: &str) -> Self {
        Self {
            summary: Summary::of(&outcome).message(program),
            labs: outcome.labs,
            mobile_classrooms: outcome.mobile_classrooms,
            classrooms: outcome.classrooms,
        }
    }

    /// Granted amounts, as they must be echoed back on release
    pub fn outcome(&self) -> AllocationOutcome {
        AllocationOutcome::new(self.labs, self.mobile_classrooms, self.classrooms)
    }

    pub fn kind(&self) -> Summary {
        Summary::of(&self.outcome())
    }

    /// Denial flag derived from the amounts, never from the summary text
    #[inline]
    pub fn is_denied(&self) -> bool {
        self.outcome().is_denied()
    }
}

/// Requester's verdict on a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfirmationVerb {
    Accept,
    Reject,
}

impl ConfirmationVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationVerb::Accept => "CONFIRMAR_ASIGNACION",
            ConfirmationVerb::Reject => "RECHAZAR_ASIGNACION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CONFIRMAR_ASIGNACION" => Some(ConfirmationVerb::Accept),
            "RECHAZAR_ASIGNACION" => Some(ConfirmationVerb::Reject),
            _ => None,
        }
    }

    /// Fixed acknowledgement text sent back to the requester
    pub fn ack(&self) -> &'static str {
        match self {
            ConfirmationVerb::Accept => "CONFIRMADO ACEPTACION",
            ConfirmationVerb::Reject => "CONFIRMADO RECHAZO",
        }
    }
}

impl fmt::Display for ConfirmationVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accept or reject of a previously received result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ConfirmationWire", into = "ConfirmationWire")]
pub struct Confirmation {
    pub verb: ConfirmationVerb,
    pub program: String,
    pub result: AllocationResult,
}

impl Confirmation {
    pub fn new(verb: ConfirmationVerb, program: impl Into<String>, result: AllocationResult) -> Self {
        Self {
            verb,
            program: program.into(),
            result,
        }
    }

    /// Apply to the pool: accept keeps the allocation, reject releases
    /// exactly the echoed amounts.
    pub fn apply(&self, pool: &ResourcePool) -> Result<(), ReleaseError> {
        match self.verb {
            ConfirmationVerb::Accept => Ok(()),
            ConfirmationVerb::Reject => pool.release(&self.result.outcome()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ConfirmationWire {
    #[serde(rename = "encabezado")]
    header: String,
    #[serde(rename = "resEnvio")]
    result: AllocationResult,
}

impl TryFrom<ConfirmationWire> for Confirmation {
    type Error = String;

    fn try_from(wire: ConfirmationWire) -> Result<Self, Self::Error> {
        let (verb, program) = wire
            .header
            .split_once(':')
            .unwrap_or((wire.header.as_str(), ""));
        let verb = ConfirmationVerb::parse(verb)
            .ok_or_else(|| format!("unknown confirmation verb: {}", verb))?;
        Ok(Confirmation {
            verb,
            program: program.to_string(),
            result: wire.result,
        })
    }
}

impl From<Confirmation> for ConfirmationWire {
    fn from(c: Confirmation) -> Self {
        ConfirmationWire {
            header: format!("{}:{}", c.verb, c.program),
            result: c.result,
        }
    }
}
