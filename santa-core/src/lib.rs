use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

pub type ParticipantId = String;
pub type PollId = String;

pub const MIN_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    #[serde(default)]
    pub exclusions: Vec<ParticipantId>,
    #[serde(default)]
    pub preferences: Option<String>,
    #[serde(default)]
    pub secret_message: Option<String>,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub giftee_id: Option<ParticipantId>,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            exclusions: Vec::new(),
            preferences: None,
            secret_message: None,
            is_host: false,
            giftee_id: None,
        }
    }

    pub fn with_exclusions<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ParticipantId>,
    {
        self.exclusions = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn excludes(&self, other: &str) -> bool {
        self.exclusions.iter().any(|id| id == other)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignmentEdge {
    pub giver: ParticipantId,
    pub recipient: ParticipantId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub edges: Vec<AssignmentEdge>,
}

impl Assignment {
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssignmentEdge> {
        self.edges.iter()
    }

    pub fn recipient_of(&self, giver: &str) -> Option<&ParticipantId> {
        self.edges
            .iter()
            .find(|e| e.giver == giver)
            .map(|e| &e.recipient)
    }

    /// Checks that the edges form a fixed-point-free permutation of exactly
    /// `participants` and that no edge hits an exclusion.
    pub fn is_valid_for(&self, participants: &[Participant]) -> bool {
        if self.edges.len() != participants.len() {
            return false;
        }

        let ids: HashSet<&str> = participants.iter().map(|p| p.id.as_str()).collect();
        let mut givers = HashSet::new();
        let mut recipients = HashSet::new();
        for edge in &self.edges {
            if edge.giver == edge.recipient
                || !ids.contains(edge.giver.as_str())
                || !ids.contains(edge.recipient.as_str())
                || !givers.insert(edge.giver.as_str())
                || !recipients.insert(edge.recipient.as_str())
            {
                return false;
            }
        }

        participants.iter().all(|p| {
            self.recipient_of(&p.id)
                .map(|r| !p.excludes(r))
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssignError {
    #[error("need at least 2 participants, found {found}")]
    InsufficientParticipants { found: usize },
    #[error("duplicate participant id {0}")]
    DuplicateParticipant(ParticipantId),
    #[error("cannot satisfy exclusions after {attempts} attempts")]
    Infeasible { attempts: usize },
}

pub fn attempt_budget(n: usize) -> usize {
    MIN_ATTEMPTS.max(n.saturating_mul(n))
}

// Each attempt reads a shuffled order as one cycle, so nobody draws
// themselves. Cycles hitting an exclusion are retried up to attempt_budget(n).
pub fn assign<R: Rng + ?Sized>(
    participants: &[Participant],
    rng: &mut R,
) -> Result<Assignment, AssignError> {
    let n = participants.len();
    if n < 2 {
        return Err(AssignError::InsufficientParticipants { found: n });
    }

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(n);
    for (i, p) in participants.iter().enumerate() {
        if index.insert(p.id.as_str(), i).is_some() {
            return Err(AssignError::DuplicateParticipant(p.id.clone()));
        }
    }

    // forbidden[g] holds every recipient index g may not give to, g included.
    let forbidden: Vec<HashSet<usize>> = participants
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut set: HashSet<usize> = p
                .exclusions
                .iter()
                .filter_map(|id| index.get(id.as_str()).copied())
                .collect();
            set.insert(i);
            set
        })
        .collect();

    if obviously_infeasible(&forbidden) {
        return Err(AssignError::Infeasible { attempts: 0 });
    }

    let budget = attempt_budget(n);
    let mut order: Vec<usize> = (0..n).collect();
    for _ in 0..budget {
        order.shuffle(rng);
        if cycle_allowed(&order, &forbidden) {
            return Ok(cycle_to_assignment(&order, participants));
        }
    }

    Err(AssignError::Infeasible { attempts: budget })
}

fn obviously_infeasible(forbidden: &[HashSet<usize>]) -> bool {
    let n = forbidden.len();
    // Someone with nobody left to give to.
    if forbidden.iter().any(|set| set.len() >= n) {
        return true;
    }
    // Someone nobody may give to.
    (0..n).any(|r| forbidden.iter().all(|set| set.contains(&r)))
}

fn cycle_allowed(order: &[usize], forbidden: &[HashSet<usize>]) -> bool {
    let n = order.len();
    order
        .iter()
        .enumerate()
        .all(|(i, giver)| !forbidden[*giver].contains(&order[(i + 1) % n]))
}

fn cycle_to_assignment(order: &[usize], participants: &[Participant]) -> Assignment {
    let n = order.len();
    let mut recipient = vec![0usize; n];
    for (i, giver) in order.iter().enumerate() {
        recipient[*giver] = order[(i + 1) % n];
    }

    // Edges follow the room's join order for display.
    let edges = participants
        .iter()
        .zip(recipient)
        .map(|(giver, r)| AssignmentEdge {
            giver: giver.id.clone(),
            recipient: participants[r].id.clone(),
        })
        .collect();

    Assignment { edges }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub votes: BTreeMap<ParticipantId, String>,
    pub created_by: String,
}

impl Poll {
    pub fn new(
        id: impl Into<PollId>,
        question: &str,
        options: &[String],
        created_by: impl Into<String>,
    ) -> Result<Self, RoomError> {
        let question = question.trim();
        let options: Vec<String> = options
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();

        if question.is_empty() || options.len() < 2 {
            return Err(RoomError::InvalidPoll);
        }

        Ok(Self {
            id: id.into(),
            question: question.to_string(),
            options,
            votes: BTreeMap::new(),
            created_by: created_by.into(),
        })
    }

    pub fn vote(&mut self, voter_id: &str, option: &str) -> Result<(), RoomError> {
        if !self.options.iter().any(|o| o == option) {
            return Err(RoomError::InvalidOption);
        }
        self.votes.insert(voter_id.to_string(), option.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub code: String,
    pub name: String,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub exchange_date: Option<String>,
    #[serde(default)]
    pub is_started: bool,
    #[serde(default)]
    pub assignment: Option<Assignment>,
    #[serde(default)]
    pub polls: Vec<Poll>,
    #[serde(default)]
    pub created_at: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("game already started")]
    AlreadyStarted,
    #[error("participant not found")]
    ParticipantNotFound,
    #[error("poll not found")]
    PollNotFound,
    #[error("name taken")]
    NameTaken,
    #[error("poll needs a question and at least 2 options")]
    InvalidPoll,
    #[error("option is not part of this poll")]
    InvalidOption,
    #[error("assignment does not match the room's participants")]
    AssignmentMismatch,
}

impl Room {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        mut host: Participant,
        exchange_date: Option<String>,
        created_at: u64,
    ) -> Self {
        host.is_host = true;
        Self {
            code: code.into(),
            name: name.into(),
            participants: vec![host],
            exchange_date,
            is_started: false,
            assignment: None,
            polls: Vec::new(),
            created_at,
        }
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn add_participant(&mut self, participant: Participant) -> Result<(), RoomError> {
        if self.is_started {
            return Err(RoomError::AlreadyStarted);
        }
        if self
            .participants
            .iter()
            .any(|p| p.name.eq_ignore_ascii_case(&participant.name))
        {
            return Err(RoomError::NameTaken);
        }
        if participant
            .exclusions
            .iter()
            .any(|id| self.participant(id).is_none())
        {
            return Err(RoomError::ParticipantNotFound);
        }
        self.participants.push(participant);
        Ok(())
    }

    pub fn remove_participant(&mut self, id: &str) -> Result<Participant, RoomError> {
        if self.is_started {
            return Err(RoomError::AlreadyStarted);
        }
        let position = self
            .participants
            .iter()
            .position(|p| p.id == id)
            .ok_or(RoomError::ParticipantNotFound)?;
        Ok(self.participants.remove(position))
    }

    pub fn apply_assignment(&mut self, assignment: Assignment) -> Result<(), RoomError> {
        if self.is_started {
            return Err(RoomError::AlreadyStarted);
        }
        if !assignment.is_valid_for(&self.participants) {
            return Err(RoomError::AssignmentMismatch);
        }

        for participant in self.participants.iter_mut() {
            participant.giftee_id = assignment.recipient_of(&participant.id).cloned();
        }
        self.assignment = Some(assignment);
        self.is_started = true;
        Ok(())
    }

    pub fn add_poll(&mut self, poll: Poll) {
        self.polls.push(poll);
    }

    pub fn vote(
        &mut self,
        poll_id: &str,
        voter_id: &str,
        option: &str,
    ) -> Result<&Poll, RoomError> {
        if self.participant(voter_id).is_none() {
            return Err(RoomError::ParticipantNotFound);
        }
        let poll = self
            .polls
            .iter_mut()
            .find(|p| p.id == poll_id)
            .ok_or(RoomError::PollNotFound)?;
        poll.vote(voter_id, option)?;
        Ok(&*poll)
    }
}
