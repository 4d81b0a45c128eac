//! Map locator and installer.
//!
//! The locator reads the per-process mapping listing (one entry per mapping,
//! named `<start>-<end>` in hex). The installer places a read-only page of
//! the unlinked marker right below the lowest mapping, at exactly that
//! address or not at all.

use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::ptr::NonNull;

use breakmaps_config::{log_maps_debug, log_maps_info};
use nix::dir::Dir;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::{sysconf, SysconfVar};

use crate::{Error, Result};

/// Lowest start address listed under `listing` (normally `/proc/self/map_files`).
pub fn lowest_mapping(listing: &Path) -> Result<usize> {
    let listing_err = |source: nix::Error| Error::MapListing {
        path: listing.to_path_buf(),
        source,
    };
    let mut dir = Dir::open(
        listing,
        OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
        Mode::empty(),
    )
    .map_err(listing_err)?;

    let mut lowest: Option<usize> = None;
    let mut malformed: Option<Error> = None;
    for entry in dir.iter() {
        let entry = entry.map_err(listing_err)?;
        let name = entry.file_name().to_bytes();
        if name == b"." || name == b".." {
            continue;
        }
        match parse_start(&String::from_utf8_lossy(name)) {
            Ok(start) => lowest = Some(lowest.map_or(start, |low| low.min(start))),
            Err(e) => {
                log_maps_debug!("skipping mapping entry", error = e.to_string());
                malformed.get_or_insert(e);
            }
        }
    }

    // Malformed entries only matter when nothing else could be read.
    let lowest = match (lowest, malformed) {
        (Some(lowest), _) => lowest,
        (None, Some(e)) => return Err(e),
        (None, None) => {
            return Err(Error::NoMappings {
                path: listing.to_path_buf(),
            })
        }
    };
    log_maps_info!("located lowest mapping", address = format!("{:#x}", lowest));
    Ok(lowest)
}

/// Parse the leading hex field of a `<start>-<end>` entry name.
pub fn parse_start(name: &str) -> Result<usize> {
    let digits = name.bytes().take_while(u8::is_ascii_hexdigit).count();
    usize::from_str_radix(&name[..digits], 16).map_err(|_| Error::MalformedMapEntry {
        name: name.to_string(),
    })
}

pub fn page_size() -> Result<usize> {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => Ok(size as usize),
        Ok(_) => Err(Error::PageSize(Errno::EINVAL)),
        Err(e) => Err(Error::PageSize(e)),
    }
}

/// One page below `lowest`. Address zero is never a valid target.
pub fn target_address(lowest: usize, page: usize) -> Result<NonZeroUsize> {
    lowest
        .checked_sub(page)
        .and_then(NonZeroUsize::new)
        .ok_or(Error::NoRoomBelow { lowest })
}

/// A page of the marker mapped at a fixed address. Unmapped on release or drop.
#[derive(Debug)]
pub struct InstalledMapping {
    addr: Option<NonNull<c_void>>,
    len: NonZeroUsize,
    // Keeps the unlinked marker alive alongside its mapping.
    _marker: OwnedFd,
}

impl InstalledMapping {
    /// Map one page of `marker` at `lowest - page`, read-only and private.
    pub fn install(marker: OwnedFd, lowest: usize, page: usize) -> Result<Self> {
        let target = target_address(lowest, page)?;
        let len = NonZeroUsize::new(page).ok_or(Error::PageSize(Errno::EINVAL))?;
        let flags = MapFlags::MAP_PRIVATE | MapFlags::from_bits_retain(libc::MAP_FIXED_NOREPLACE);

        // SAFETY: NOREPLACE refuses to clobber anything already mapped at `target`.
        let mapped = unsafe { mmap(Some(target), len, ProtFlags::PROT_READ, flags, &marker, 0) }
            .map_err(|source| Error::Map {
                addr: target.get(),
                source,
            })?;

        // Kernels predating NOREPLACE treat the address as a hint.
        let got = mapped.as_ptr() as usize;
        if got != target.get() {
            // SAFETY: `mapped` was returned by the mmap above and is not shared.
            let _ = unsafe { munmap(mapped, len.get()) };
            return Err(Error::Relocated {
                wanted: target.get(),
                got,
            });
        }

        log_maps_info!("installed mapping", address = format!("{:#x}", got), len = len.get());
        Ok(Self {
            addr: Some(mapped),
            len,
            _marker: marker,
        })
    }

    pub fn address(&self) -> usize {
        self.addr.map_or(0, |addr| addr.as_ptr() as usize)
    }

    pub fn size(&self) -> usize {
        self.len.get()
    }

    /// Unmap now and close the marker.
    pub fn release(mut self) -> Result<()> {
        self.unmap()
    }

    fn unmap(&mut self) -> Result<()> {
        let Some(addr) = self.addr.take() else {
            return Ok(());
        };
        // SAFETY: `addr` came from our own mmap and nothing borrows the page.
        unsafe { munmap(addr, self.len.get()) }.map_err(|source| Error::Unmap {
            addr: addr.as_ptr() as usize,
            source,
        })
    }
}

impl Drop for InstalledMapping {
    fn drop(&mut self) {
        let _ = self.unmap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, tempfile};

    fn marker() -> OwnedFd {
        tempfile().unwrap().into()
    }

    /// Reserve `pages` inaccessible anonymous pages and return their base.
    fn reserve(pages: usize) -> usize {
        let page = page_size().unwrap();
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                pages * page,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(base, libc::MAP_FAILED);
        base as usize
    }

    fn release_raw(addr: usize, len: usize) {
        unsafe {
            libc::munmap(addr as *mut libc::c_void, len);
        }
    }

    #[test]
    fn test_parse_start() {
        assert_eq!(parse_start("55d0c0a00000-55d0c0a02000").unwrap(), 0x55d0c0a00000);
        assert_eq!(parse_start("400000-401000").unwrap(), 0x400000);
        assert!(matches!(
            parse_start("-1000"),
            Err(Error::MalformedMapEntry { .. })
        ));
        assert!(parse_start("zz").is_err());
    }

    #[test]
    fn test_target_is_exactly_one_page_below() {
        let target = target_address(0x5555_0000, 0x1000).unwrap();
        assert_eq!(target.get(), 0x5554_f000);
        let target = target_address(0x7f00_0000_0000, 0x4000).unwrap();
        assert_eq!(target.get(), 0x7eff_ffff_c000);
    }

    #[test]
    fn test_target_needs_room() {
        assert!(matches!(
            target_address(0x1000, 0x1000),
            Err(Error::NoRoomBelow { lowest: 0x1000 })
        ));
        assert!(target_address(0x800, 0x1000).is_err());
    }

    #[test]
    fn test_lowest_from_synthetic_listing() {
        let dir = tempdir().unwrap();
        for name in ["7f0000000000-7f0000001000", "55d000-55e000", "600000-601000"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(lowest_mapping(dir.path()).unwrap(), 0x55d000);
    }

    #[test]
    fn test_empty_listing_has_no_mappings() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            lowest_mapping(dir.path()),
            Err(Error::NoMappings { .. })
        ));
    }

    #[test]
    fn test_missing_listing() {
        let err = lowest_mapping(Path::new("/nonexistent/map_files")).unwrap_err();
        assert!(matches!(err, Error::MapListing { .. }));
        assert!(err.to_string().starts_with("could not open /nonexistent/map_files"));
    }

    #[test]
    fn test_malformed_listing_entry() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("not-an-address"), b"").unwrap();
        assert!(matches!(
            lowest_mapping(dir.path()),
            Err(Error::MalformedMapEntry { .. })
        ));
    }

    #[test]
    fn test_malformed_entry_is_skipped_beside_valid_ones() {
        let dir = tempdir().unwrap();
        for name in ["zz-not-an-address", "600000-601000", "55d000-55e000"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(lowest_mapping(dir.path()).unwrap(), 0x55d000);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_listing_is_readable() {
        let lowest = lowest_mapping(Path::new("/proc/self/map_files")).unwrap();
        assert!(lowest >= page_size().unwrap());
    }

    #[test]
    fn test_install_in_free_page() {
        let page = page_size().unwrap();
        let base = reserve(3);
        // Open a one-page hole at the bottom of the reservation.
        release_raw(base, page);

        let mapping = InstalledMapping::install(marker(), base + page, page).unwrap();
        assert_eq!(mapping.address(), base);
        assert_eq!(mapping.size(), page);
        mapping.release().unwrap();

        release_raw(base + page, 2 * page);
    }

    #[test]
    fn test_install_refuses_occupied_target() {
        let page = page_size().unwrap();
        let base = reserve(2);

        let err = InstalledMapping::install(marker(), base + page, page).unwrap_err();
        assert!(
            matches!(err, Error::Map { addr, .. } if addr == base)
                || matches!(err, Error::Relocated { wanted, .. } if wanted == base),
            "unexpected error {:?}",
            err
        );

        release_raw(base, 2 * page);
    }

    #[test]
    fn test_drop_unmaps() {
        let page = page_size().unwrap();
        let base = reserve(2);
        release_raw(base, page);

        let first = InstalledMapping::install(marker(), base + page, page).unwrap();
        drop(first);
        // The page is free again, so the same placement succeeds.
        let second = InstalledMapping::install(marker(), base + page, page).unwrap();
        assert_eq!(second.address(), base);
        drop(second);

        release_raw(base + page, page);
    }
}
