//! A crossword filler expressed as a constraint satisfaction problem: every
//! slot takes a dictionary word of matching length, no word is used twice,
//! and crossing slots agree on the shared letter. Filling runs a node
//! consistency pass, a global AC-3 pass, and then backtracking search that
//! maintains arc consistency after each tentative choice.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{self, Debug, Formatter};

use bit_set::BitSet;
use instant::{Duration, Instant};
use log::debug;
use smallvec::SmallVec;

/// The expected maximum number of slots appearing in a grid.
pub const MAX_SLOT_COUNT: usize = 256;

/// The expected maximum length for a single slot.
pub const MAX_SLOT_LENGTH: usize = 21;

/// An identifier for a given slot, based on its index in the crossword's
/// `slots` field, which also corresponds to an index in the solver's domain
/// table.
pub type SlotId = usize;

/// An identifier for a given dictionary word, based on its index in the
/// crossword's `words` field.
pub type WordId = usize;

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Across,
    Down,
}

/// A candidate word from the dictionary, with its characters cached for
/// constant-time access at overlap offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    pub chars: SmallVec<[char; MAX_SLOT_LENGTH]>,
}

/// A maximal run of open cells in one direction, to be filled with one word.
/// Two slots are the same slot exactly when start cell, direction, and
/// length all match; ids are unique per puzzle, so derived equality agrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub id: SlotId,
    pub row: usize,
    pub col: usize,
    pub direction: Direction,
    pub length: usize,
}

impl Slot {
    /// Grid coordinates (row, col) of the cell at `offset` within this slot.
    pub fn cell(&self, offset: usize) -> (usize, usize) {
        match self.direction {
            Direction::Across => (self.row, self.col + offset),
            Direction::Down => (self.row + offset, self.col),
        }
    }
}

/// Errors from puzzle construction. Anything structurally well-formed but
/// unfillable is not an error; it surfaces later as a failed solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PuzzleError {
    EmptyTemplate,
    EmptyDictionary,
}

impl fmt::Display for PuzzleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PuzzleError::EmptyTemplate => write!(f, "template contains no rows"),
            PuzzleError::EmptyDictionary => write!(f, "word list is empty"),
        }
    }
}

impl std::error::Error for PuzzleError {}

/// The immutable puzzle definition: grid geometry, the slot set, the
/// pairwise overlap table, and the dictionary. Everything here is computed
/// once at construction and never mutated; the solver only reads it.
pub struct Crossword {
    width: usize,
    height: usize,
    open: Vec<Vec<bool>>,
    slots: SmallVec<[Slot; MAX_SLOT_COUNT]>,
    overlaps: Vec<Vec<Option<(usize, usize)>>>,
    neighbors: Vec<SmallVec<[SlotId; MAX_SLOT_COUNT]>>,
    words: Vec<Word>,
}

impl Debug for Crossword {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crossword")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("slots", &self.slots)
            .field("words", &(["(", &self.words.len().to_string(), " entries)"].join("")))
            .finish()
    }
}

impl Crossword {
    /// Build a crossword from a template string and a word list. In the
    /// template, `_` and `.` mark open cells and any other character marks a
    /// blocked cell. Blank lines and surrounding whitespace are ignored, and
    /// rows shorter than the widest one are padded with blocked cells.
    ///
    /// A slot is a maximal run of at least two open cells in one direction.
    /// The word list is deduplicated, keeping first occurrences.
    pub fn from_template(template: &str, word_list: &[String]) -> Result<Crossword, PuzzleError> {
        let rows: Vec<Vec<char>> = template
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    None
                } else {
                    Some(line.chars().collect())
                }
            })
            .collect();

        if rows.is_empty() {
            return Err(PuzzleError::EmptyTemplate);
        }
        if word_list.is_empty() {
            return Err(PuzzleError::EmptyDictionary);
        }

        let height = rows.len();
        let width = rows.iter().map(|row| row.len()).max().unwrap_or(0);
        let open: Vec<Vec<bool>> = rows
            .iter()
            .map(|row| {
                (0..width)
                    .map(|col| row.get(col).map(|&c| c == '_' || c == '.').unwrap_or(false))
                    .collect()
            })
            .collect();

        let mut slots: SmallVec<[Slot; MAX_SLOT_COUNT]> = SmallVec::new();

        for (row, cells) in open.iter().enumerate() {
            let mut start = 0;
            let mut run = 0;
            for col in 0..=width {
                if col < width && cells[col] {
                    if run == 0 {
                        start = col;
                    }
                    run += 1;
                } else {
                    if run >= 2 {
                        slots.push(Slot {
                            id: slots.len(),
                            row,
                            col: start,
                            direction: Direction::Across,
                            length: run,
                        });
                    }
                    run = 0;
                }
            }
        }

        for col in 0..width {
            let mut start = 0;
            let mut run = 0;
            for row in 0..=height {
                if row < height && open[row][col] {
                    if run == 0 {
                        start = row;
                    }
                    run += 1;
                } else {
                    if run >= 2 {
                        slots.push(Slot {
                            id: slots.len(),
                            row: start,
                            col,
                            direction: Direction::Down,
                            length: run,
                        });
                    }
                    run = 0;
                }
            }
        }

        // Build a map from cell location to the slots covering it, which
        // gives us the overlap table: two slots sharing a cell constrain
        // each other at the offsets of that cell within each slot.
        let mut cell_slots: HashMap<(usize, usize), Vec<(SlotId, usize)>> = HashMap::new();
        for slot in &slots {
            for offset in 0..slot.length {
                cell_slots.entry(slot.cell(offset)).or_default().push((slot.id, offset));
            }
        }

        let slot_count = slots.len();
        let mut overlaps = vec![vec![None; slot_count]; slot_count];
        for covering in cell_slots.values() {
            for &(x, cx) in covering {
                for &(y, cy) in covering {
                    if x != y {
                        overlaps[x][y] = Some((cx, cy));
                    }
                }
            }
        }

        let neighbors: Vec<SmallVec<[SlotId; MAX_SLOT_COUNT]>> = (0..slot_count)
            .map(|x| (0..slot_count).filter(|&y| overlaps[x][y].is_some()).collect())
            .collect();

        let mut seen: HashSet<&str> = HashSet::with_capacity(word_list.len());
        let mut words: Vec<Word> = Vec::with_capacity(word_list.len());
        for text in word_list {
            if seen.insert(text.as_str()) {
                words.push(Word {
                    text: text.clone(),
                    chars: text.chars().collect(),
                });
            }
        }

        Ok(Crossword {
            width,
            height,
            open,
            slots,
            overlaps,
            neighbors,
            words,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Whether the cell at (row, col) is fillable rather than blocked.
    pub fn is_open(&self, row: usize, col: usize) -> bool {
        self.open[row][col]
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The overlap between two slots: `Some((cx, cy))` means the character
    /// at offset `cx` in `x`'s word must equal the character at offset `cy`
    /// in `y`'s word. Symmetric with swapped offsets; `None` when the slots
    /// do not intersect.
    pub fn overlap(&self, x: SlotId, y: SlotId) -> Option<(usize, usize)> {
        self.overlaps[x][y]
    }

    /// The slots sharing a defined overlap with `x`, in ascending id order.
    pub fn neighbors(&self, x: SlotId) -> &[SlotId] {
        &self.neighbors[x]
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn word(&self, id: WordId) -> &Word {
        &self.words[id]
    }
}

/// A struct tracking statistics about a solve.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub states: u64,
    pub backtracks: u64,
    pub duration: Duration,
}

/// A partial mapping from slots to chosen words, built up incrementally
/// during search and fully unwound on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    choices: Vec<Option<WordId>>,
    assigned: usize,
}

impl Assignment {
    fn new(slot_count: usize) -> Assignment {
        Assignment {
            choices: vec![None; slot_count],
            assigned: 0,
        }
    }

    pub fn word(&self, slot: SlotId) -> Option<WordId> {
        self.choices[slot]
    }

    pub fn contains(&self, slot: SlotId) -> bool {
        self.choices[slot].is_some()
    }

    pub fn len(&self) -> usize {
        self.assigned
    }

    pub fn is_empty(&self) -> bool {
        self.assigned == 0
    }

    /// Whether every slot has been assigned a word.
    pub fn is_complete(&self) -> bool {
        self.assigned == self.choices.len()
    }

    /// The assigned (slot, word) pairs in ascending slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, WordId)> + '_ {
        self.choices
            .iter()
            .enumerate()
            .filter_map(|(slot, choice)| choice.map(|word| (slot, word)))
    }

    fn set(&mut self, slot: SlotId, word: WordId) {
        if self.choices[slot].is_none() {
            self.assigned += 1;
        }
        self.choices[slot] = Some(word);
    }

    fn unset(&mut self, slot: SlotId) {
        if self.choices[slot].is_some() {
            self.assigned -= 1;
        }
        self.choices[slot] = None;
    }
}

/// Fills a crossword by backtracking search over per-slot candidate sets,
/// pruned by arc consistency. The domain table is owned exclusively by one
/// solve at a time and is reinitialized to the full dictionary per slot at
/// the start of each `solve` call.
pub struct Solver<'a> {
    puzzle: &'a Crossword,
    domains: Vec<BitSet>,
    stats: Statistics,
}

impl<'a> Solver<'a> {
    pub fn new(puzzle: &'a Crossword) -> Solver<'a> {
        Solver {
            puzzle,
            domains: Self::full_domains(puzzle),
            stats: Statistics {
                states: 0,
                backtracks: 0,
                duration: Duration::from_millis(0),
            },
        }
    }

    fn full_domains(puzzle: &Crossword) -> Vec<BitSet> {
        let full: BitSet = (0..puzzle.words().len()).collect();
        puzzle.slots().iter().map(|_| full.clone()).collect()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// The current candidate set for a slot.
    pub fn domain(&self, slot: SlotId) -> &BitSet {
        &self.domains[slot]
    }

    /// Drop every candidate whose length differs from its slot's length.
    /// Purely per-slot with no cross-slot interaction, and idempotent. Must
    /// run before any arc consistency pass, since `revise` indexes words at
    /// overlap offsets and relies on domains being length-consistent.
    pub fn enforce_node_consistency(&mut self) {
        for slot in self.puzzle.slots() {
            let wrong_length: Vec<WordId> = self.domains[slot.id]
                .iter()
                .filter(|&word| self.puzzle.word(word).chars.len() != slot.length)
                .collect();
            for word in wrong_length {
                self.domains[slot.id].remove(word);
            }
        }
    }

    /// Remove from `x`'s domain every candidate with no supporting candidate
    /// in `y`'s domain (or, when `fixed_y` is given, in the singleton
    /// `{fixed_y}`) at the overlap offsets for the pair. Returns whether
    /// anything was removed. A pair with no overlap is left untouched, and
    /// `y`'s domain is never modified.
    pub fn revise(&mut self, x: SlotId, y: SlotId, fixed_y: Option<WordId>) -> bool {
        self.revise_with_trail(x, y, fixed_y, None)
    }

    fn revise_with_trail(
        &mut self,
        x: SlotId,
        y: SlotId,
        fixed_y: Option<WordId>,
        mut trail: Option<&mut Vec<(SlotId, WordId)>>,
    ) -> bool {
        let (cx, cy) = match self.puzzle.overlap(x, y) {
            Some(offsets) => offsets,
            None => return false,
        };

        let unsupported: Vec<WordId> = self.domains[x]
            .iter()
            .filter(|&wx| {
                let glyph = self.puzzle.word(wx).chars[cx];
                match fixed_y {
                    Some(wy) => self.puzzle.word(wy).chars[cy] != glyph,
                    None => !self.domains[y]
                        .iter()
                        .any(|wy| self.puzzle.word(wy).chars[cy] == glyph),
                }
            })
            .collect();

        let revised = !unsupported.is_empty();
        for word in unsupported {
            self.domains[x].remove(word);
            if let Some(trail) = trail.as_deref_mut() {
                trail.push((x, word));
            }
        }
        revised
    }

    /// Run AC-3 over every arc with a defined overlap, in both directions.
    /// Returns false as soon as any domain empties, meaning the puzzle is
    /// unsatisfiable; true once the queue drains with every domain
    /// non-empty.
    pub fn ac3(&mut self) -> bool {
        let arcs: Vec<(SlotId, SlotId)> = self
            .puzzle
            .slots()
            .iter()
            .flat_map(|slot| self.puzzle.neighbors(slot.id).iter().map(move |&y| (slot.id, y)))
            .collect();
        self.propagate(arcs, None, None)
    }

    /// The AC-3 loop shared by the global pass and assignment-aware
    /// inference. Pop an arc, revise it, and when the revision shrank
    /// domain(x), re-enqueue every arc (z, x) for neighbors z other than y.
    /// Pending arcs are tracked in a bit set so the same arc is never queued
    /// twice at once.
    ///
    /// When `assignment` is given, a slot bound in it is treated as having a
    /// singleton domain holding its assigned word. When `trail` is given,
    /// every removal is recorded on it so the caller can put the domains
    /// back after abandoning a branch; removals performed before a failure
    /// is detected are on the trail too.
    fn propagate(
        &mut self,
        seed: Vec<(SlotId, SlotId)>,
        assignment: Option<&Assignment>,
        mut trail: Option<&mut Vec<(SlotId, WordId)>>,
    ) -> bool {
        let slot_count = self.puzzle.slot_count();
        let mut queue: VecDeque<(SlotId, SlotId)> = VecDeque::with_capacity(seed.len());
        let mut pending = BitSet::with_capacity(slot_count * slot_count);

        for (x, y) in seed {
            if pending.insert(x * slot_count + y) {
                queue.push_back((x, y));
            }
        }

        while let Some((x, y)) = queue.pop_front() {
            pending.remove(x * slot_count + y);

            let fixed_y = assignment.and_then(|assignment| assignment.word(y));
            if !self.revise_with_trail(x, y, fixed_y, trail.as_deref_mut()) {
                continue;
            }

            if self.domains[x].is_empty() {
                return false;
            }

            for &z in self.puzzle.neighbors(x) {
                if z != y && pending.insert(z * slot_count + x) {
                    queue.push_back((z, x));
                }
            }
        }

        true
    }

    /// Propagate the consequences of tentatively binding `var`: make each
    /// unassigned neighbor arc-consistent against it, treating every
    /// assigned slot as fixed to its single word. On success, returns the
    /// bindings forced by propagation, meaning every unassigned slot whose
    /// domain now holds exactly one candidate. Returns None when a domain
    /// empties; in both cases all removals are recorded on `trail`.
    fn infer(
        &mut self,
        var: SlotId,
        assignment: &Assignment,
        trail: &mut Vec<(SlotId, WordId)>,
    ) -> Option<Vec<(SlotId, WordId)>> {
        let arcs: Vec<(SlotId, SlotId)> = self
            .puzzle
            .neighbors(var)
            .iter()
            .filter(|&&x| !assignment.contains(x))
            .map(|&x| (x, var))
            .collect();

        if !self.propagate(arcs, Some(assignment), Some(trail)) {
            return None;
        }

        let forced = (0..self.puzzle.slot_count())
            .filter_map(|slot| {
                if assignment.contains(slot) {
                    return None;
                }
                let mut candidates = self.domains[slot].iter();
                match (candidates.next(), candidates.next()) {
                    (Some(word), None) => Some((slot, word)),
                    _ => None,
                }
            })
            .collect();

        Some(forced)
    }

    /// Re-insert domain entries removed while exploring a failed branch, so
    /// sibling candidates see exactly the domains that existed before it.
    fn undo(&mut self, trail: &[(SlotId, WordId)]) {
        for &(slot, word) in trail {
            self.domains[slot].insert(word);
        }
    }

    /// Choose the next slot to fill: fewest remaining candidates, ties
    /// broken by the most unassigned neighbors and then by lowest slot id,
    /// so selection is fully deterministic within a run.
    fn select_unassigned_variable(&self, assignment: &Assignment) -> SlotId {
        self.puzzle
            .slots()
            .iter()
            .filter(|slot| !assignment.contains(slot.id))
            .min_by_key(|slot| {
                let degree = self
                    .puzzle
                    .neighbors(slot.id)
                    .iter()
                    .filter(|&&y| !assignment.contains(y))
                    .count();
                (self.domains[slot.id].len(), Reverse(degree), slot.id)
            })
            .map(|slot| slot.id)
            .expect("called with a complete assignment")
    }

    /// Order `var`'s candidates by how many options they would rule out
    /// across unassigned neighbors' domains, fewest first. Ties keep the
    /// ascending word-id order of the domain. Only affects search effort,
    /// never which solutions exist.
    fn order_domain_values(&self, var: SlotId, assignment: &Assignment) -> Vec<WordId> {
        let mut ranked: Vec<(WordId, usize)> = self.domains[var]
            .iter()
            .map(|word| {
                let glyphs = &self.puzzle.word(word).chars;
                let ruled_out: usize = self
                    .puzzle
                    .neighbors(var)
                    .iter()
                    .filter(|&&y| !assignment.contains(y))
                    .map(|&y| {
                        let (cx, cy) =
                            self.puzzle.overlap(var, y).expect("neighbor without an overlap");
                        let glyph = glyphs[cx];
                        self.domains[y]
                            .iter()
                            .filter(|&wy| self.puzzle.word(wy).chars[cy] != glyph)
                            .count()
                    })
                    .sum();
                (word, ruled_out)
            })
            .collect();

        ranked.sort_by_key(|&(_, ruled_out)| ruled_out);
        ranked.into_iter().map(|(word, _)| word).collect()
    }

    /// Check the whole assignment: every word fits its slot's length, no
    /// word appears twice, and every assigned crossing pair agrees on the
    /// shared letter. Uniqueness is a global property, so this always looks
    /// at every entry rather than just the newest one.
    fn consistent(&self, assignment: &Assignment) -> bool {
        let mut used = BitSet::with_capacity(self.puzzle.words().len());
        for (slot, word) in assignment.iter() {
            let glyphs = &self.puzzle.word(word).chars;
            if glyphs.len() != self.puzzle.slots()[slot].length {
                return false;
            }
            if !used.insert(word) {
                return false;
            }
            for &y in self.puzzle.neighbors(slot) {
                if let Some(other) = assignment.word(y) {
                    let (cx, cy) =
                        self.puzzle.overlap(slot, y).expect("neighbor without an overlap");
                    if glyphs[cx] != self.puzzle.word(other).chars[cy] {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Recursive backtracking search. Each candidate is tried by binding it,
    /// running inference, and recursing; everything a failed candidate did
    /// to the assignment and the domains is reversed before the next
    /// candidate, so no reduction or stale binding ever leaks into a
    /// sibling branch. Failure is an ordinary false return, not a fault.
    fn backtrack(&mut self, assignment: &mut Assignment) -> bool {
        if assignment.is_complete() {
            return true;
        }

        let var = self.select_unassigned_variable(assignment);

        for val in self.order_domain_values(var, assignment) {
            self.stats.states += 1;
            assignment.set(var, val);

            let mut trail: Vec<(SlotId, WordId)> = Vec::new();
            if let Some(forced) = self.infer(var, assignment, &mut trail) {
                // The consistency check runs after merging the forced
                // bindings so that it covers them too; an inferred word
                // can collide with an assigned one.
                for &(slot, word) in &forced {
                    assignment.set(slot, word);
                }
                if self.consistent(assignment) && self.backtrack(assignment) {
                    return true;
                }
                for &(slot, _) in &forced {
                    assignment.unset(slot);
                }
            }

            assignment.unset(var);
            self.undo(&trail);
        }

        self.stats.backtracks += 1;
        false
    }

    /// Run the full pipeline: reinitialize domains, enforce node
    /// consistency, run a global arc consistency pass, then search. Returns
    /// None when no complete consistent assignment exists; that is an
    /// expected outcome, not an error.
    pub fn solve(&mut self) -> Option<Assignment> {
        let start = Instant::now();

        self.domains = Self::full_domains(self.puzzle);
        self.stats.states = 0;
        self.stats.backtracks = 0;

        self.enforce_node_consistency();
        debug!(
            "domain sizes after node consistency: {:?}",
            self.domains.iter().map(BitSet::len).collect::<Vec<_>>()
        );

        if !self.ac3() {
            self.stats.duration = start.elapsed();
            debug!("global arc consistency emptied a domain");
            return None;
        }
        debug!(
            "domain sizes after global arc consistency: {:?}",
            self.domains.iter().map(BitSet::len).collect::<Vec<_>>()
        );

        let mut assignment = Assignment::new(self.puzzle.slot_count());
        let solved = self.backtrack(&mut assignment);
        self.stats.duration = start.elapsed();
        debug!(
            "search visited {} states with {} backtracks in {:?}",
            self.stats.states, self.stats.backtracks, self.stats.duration
        );

        if solved {
            Some(assignment)
        } else {
            None
        }
    }

    /// Project an assignment onto the grid: `Some(letter)` for cells covered
    /// by an assigned word, `None` for uncovered and blocked cells. The
    /// caller can tell blocked cells apart with `Crossword::is_open`; the
    /// solver itself does no rendering.
    pub fn letter_grid(&self, assignment: &Assignment) -> Vec<Vec<Option<char>>> {
        let mut letters = vec![vec![None; self.puzzle.width()]; self.puzzle.height()];

        for (slot, word) in assignment.iter() {
            let slot = &self.puzzle.slots()[slot];
            for (offset, &glyph) in self.puzzle.word(word).chars.iter().enumerate() {
                let (row, col) = slot.cell(offset);
                letters[row][col] = Some(glyph);
            }
        }

        letters
    }
}
