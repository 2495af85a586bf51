//! Streaming a new image into an update slot.
//!
//! Sessions live in a small fixed arena.  Handles carry the generation of the
//! entry they were issued for, so a handle that outlives its session (say, a
//! second `end`) is reported as unknown instead of landing on whatever
//! session reused the entry.

use storage::{align_up, Flash};

use crate::fmt::{debug, info, warn};
use crate::image::ImageVerifier;
use crate::partition::{Partition, PartitionFlash};
use crate::{Error, Result, MAX_WRITE_SIZE};

/// How many sessions may be open at once.
pub const MAX_SESSIONS: usize = 4;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionHandle {
    index: u16,
    generation: u16,
}

/// How much of the slot to erase up front.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SizeHint {
    /// Erase the whole slot.
    Unknown,
    /// Erase enough erase blocks to hold this many bytes.  Zero means unknown.
    Exact(usize),
    /// Erase nothing now; each write erases the blocks it is about to cover.
    Sequential,
}

struct Session {
    part: Partition,
    erased_size: usize,
    /// Bytes accepted, whether streamed or placed at an offset.
    wrote_size: usize,
    /// Where the next full write unit of the stream goes.
    cursor: usize,
    sequential: bool,
    /// Streamed bytes that do not fill a write unit yet.
    tail: Tail,
    /// A write failed after part of its chunk reached the flash.  The
    /// stream cannot be continued, only ended or aborted.
    broken: bool,
}

type Tail = heapless::Vec<u8, MAX_WRITE_SIZE>;

impl Session {
    fn streamed(&self) -> usize {
        self.cursor + self.tail.len()
    }
}

struct Entry {
    generation: u16,
    session: Option<Session>,
}

#[derive(Default)]
pub struct Sessions {
    entries: heapless::Vec<Entry, MAX_SESSIONS>,
}

impl Sessions {
    pub fn new() -> Sessions {
        Sessions {
            entries: heapless::Vec::new(),
        }
    }

    /// Number of sessions currently open.
    pub fn open(&self) -> usize {
        self.entries.iter().filter(|e| e.session.is_some()).count()
    }

    /// Is this handle still attached to an open session?
    pub fn is_open(&self, handle: SessionHandle) -> bool {
        self.entries
            .get(handle.index as usize)
            .map_or(false, |e| e.generation == handle.generation && e.session.is_some())
    }

    /// Open a session on `part`, erasing as `hint` asks.
    pub fn begin<F: Flash>(
        &mut self,
        flash: &mut F,
        part: &Partition,
        hint: SizeHint,
    ) -> Result<SessionHandle> {
        let index = match self.entries.iter().position(|e| e.session.is_none()) {
            Some(index) => index,
            None => {
                self.entries
                    .push(Entry {
                        generation: 0,
                        session: None,
                    })
                    .map_err(|_| Error::NoMemory)?;
                self.entries.len() - 1
            }
        };

        let mut view = PartitionFlash::new(flash, part)?;
        let (erased_size, sequential) = match hint {
            SizeHint::Unknown | SizeHint::Exact(0) => {
                view.erase(0, part.size)?;
                (part.size, false)
            }
            SizeHint::Exact(size) => {
                if size > part.size {
                    return Err(Error::InvalidArgument);
                }
                let len = align_up(size, part.erase_size);
                view.erase(0, len)?;
                (len, false)
            }
            SizeHint::Sequential => (0, true),
        };

        let entry = &mut self.entries[index];
        entry.session = Some(Session {
            part: *part,
            erased_size,
            wrote_size: 0,
            cursor: 0,
            sequential,
            tail: heapless::Vec::new(),
            broken: false,
        });
        info!("update begin: {} ({:?}), erased {:#x}", part.label, hint, erased_size);
        Ok(SessionHandle {
            index: index as u16,
            generation: entry.generation,
        })
    }

    fn get_mut(&mut self, handle: SessionHandle) -> Result<&mut Session> {
        self.entries
            .get_mut(handle.index as usize)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.session.as_mut())
            .ok_or(Error::NotFound)
    }

    /// Remove the session behind `handle`, invalidating the handle.
    fn take(&mut self, handle: SessionHandle) -> Result<Session> {
        let entry = self
            .entries
            .get_mut(handle.index as usize)
            .filter(|e| e.generation == handle.generation && e.session.is_some())
            .ok_or(Error::NotFound)?;
        entry.generation = entry.generation.wrapping_add(1);
        entry.session.take().ok_or(Error::NotFound)
    }

    /// Append `bytes` to the stream.
    pub fn write<F: Flash, V: ImageVerifier>(
        &mut self,
        flash: &mut F,
        verifier: &V,
        handle: SessionHandle,
        bytes: &[u8],
    ) -> Result<()> {
        let session = self.get_mut(handle)?;
        if session.broken {
            return Err(Error::InvalidArgument);
        }
        if bytes.is_empty() {
            return Ok(());
        }
        let part = session.part;
        let mut view = PartitionFlash::new(flash, &part)?;
        let start = session.streamed();
        let end = start + bytes.len();
        if end > part.size {
            return Err(Error::InvalidArgument);
        }

        if session.sequential && end > session.erased_size {
            let to = align_up(end, part.erase_size);
            debug!("erasing {:#x}..{:#x} of {}", session.erased_size, to, part.label);
            view.erase(session.erased_size, to)?;
            session.erased_size = to;
        }
        assert!(
            session.erased_size > 0,
            "must erase the partition before writing to it"
        );
        if end > session.erased_size {
            return Err(Error::InvalidArgument);
        }
        verifier.check_header(start, bytes)?;

        // A failed write leaves the session as it was, unless some of the
        // chunk already reached the flash.
        let mut tail = session.tail.clone();
        let mut cursor = session.cursor;
        if let Err(e) = stream(&mut view, &mut tail, &mut cursor, bytes) {
            if cursor != session.cursor {
                warn!("stream into {} broken at {:#x}", part.label, cursor);
                session.broken = true;
            }
            return Err(e);
        }
        session.tail = tail;
        session.cursor = cursor;
        session.wrote_size += bytes.len();
        Ok(())
    }

    /// Place `bytes` at `offset` within the slot.  Offset and length must
    /// respect the device write size, and the area must already be erased.
    pub fn write_at<F: Flash, V: ImageVerifier>(
        &mut self,
        flash: &mut F,
        verifier: &V,
        handle: SessionHandle,
        offset: usize,
        bytes: &[u8],
    ) -> Result<()> {
        let session = self.get_mut(handle)?;
        if session.sequential || session.broken {
            return Err(Error::InvalidArgument);
        }
        assert!(
            session.erased_size > 0,
            "must erase the partition before writing to it"
        );
        let end = offset.checked_add(bytes.len()).ok_or(Error::InvalidArgument)?;
        if end > session.erased_size {
            return Err(Error::InvalidArgument);
        }
        verifier.check_header(offset, bytes)?;
        let part = session.part;
        PartitionFlash::new(flash, &part)?.write(offset, bytes)?;
        session.wrote_size += bytes.len();
        Ok(())
    }

    /// Finish the session: flush the stream, then have the image verified.
    /// The handle is dead afterwards whether this succeeds or not.
    pub fn end<F: Flash, V: ImageVerifier>(
        &mut self,
        flash: &mut F,
        verifier: &V,
        handle: SessionHandle,
    ) -> Result<Partition> {
        let mut session = self.take(handle)?;
        if session.broken || session.erased_size == 0 || session.wrote_size == 0 {
            return Err(Error::InvalidArgument);
        }

        let mut view = PartitionFlash::new(flash, &session.part)?;
        if !session.tail.is_empty() {
            let write_size = view.write_size();
            session
                .tail
                .resize(write_size, 0xff)
                .map_err(|_| Error::InvalidArgument)?;
            view.write(session.cursor, &session.tail)?;
        }

        if let Err(e) = verifier.verify(&mut view) {
            warn!("update of {} failed verification: {:?}", session.part.label, e);
            return Err(match e {
                Error::Flash(_) => e,
                _ => Error::ValidationFailed,
            });
        }
        info!("update end: {} ({} bytes)", session.part.label, session.wrote_size);
        Ok(session.part)
    }

    /// Drop the session without verifying anything.  Whatever was written
    /// stays in flash.
    pub fn abort(&mut self, handle: SessionHandle) -> Result<()> {
        let session = self.take(handle)?;
        info!("update aborted: {}", session.part.label);
        Ok(())
    }
}

/// Push `input` out behind the buffered `tail`, one write unit or more at a
/// time, starting at `cursor`.  Whatever does not fill a unit stays in `tail`.
fn stream<W: Flash>(
    view: &mut W,
    tail: &mut Tail,
    cursor: &mut usize,
    bytes: &[u8],
) -> Result<()> {
    let write_size = view.write_size();
    let mut input = bytes;
    if !tail.is_empty() {
        let take = (write_size - tail.len()).min(input.len());
        tail.extend_from_slice(&input[..take])
            .map_err(|_| Error::InvalidArgument)?;
        input = &input[take..];
        if tail.len() == write_size {
            view.write(*cursor, &tail[..])?;
            *cursor += write_size;
            tail.clear();
        }
    }
    let bulk = input.len() - input.len() % write_size;
    if bulk > 0 {
        view.write(*cursor, &input[..bulk])?;
        *cursor += bulk;
    }
    tail.extend_from_slice(&input[bulk..])
        .map_err(|_| Error::InvalidArgument)
}
