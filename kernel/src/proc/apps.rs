//! The registry of user programs baked into the kernel image.
//!
//! The build embeds an archive blob (path given by `APP_IMAGE_PATH` when
//! the `apps_env` feature is on): a sequence of records, each a
//! little-endian `u32` name length, the name bytes, a little-endian `u32`
//! payload length, and the ELF payload. Without the feature the registry is
//! empty and the scheduler will find nothing to run.

use arrayvec::ArrayVec;

use super::elf;
use crate::{error::KernelError, param::MAX_APP_NUM, sync::Once};

/// The program `exec`'d as pid 1.
pub const INIT_APP: &str = "init";

#[cfg(feature = "apps_env")]
static APP_IMAGE: &[u8] = include_bytes!(env!("APP_IMAGE_PATH"));
#[cfg(not(feature = "apps_env"))]
static APP_IMAGE: &[u8] = &[];

pub struct UserApp {
    pub name: &'static str,
    pub elf: &'static [u8],
}

static APPS: Once<ArrayVec<UserApp, MAX_APP_NUM>> = Once::new();

fn read_u32(image: &[u8], pos: usize) -> Option<usize> {
    let bytes = image.get(pos..pos + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().unwrap()) as usize)
}

/// Parses the embedded archive and sanity-checks every image's ELF header.
pub fn init() {
    let mut apps = ArrayVec::new();
    let mut pos = 0;

    while pos < APP_IMAGE.len() {
        let name_len = read_u32(APP_IMAGE, pos).expect("truncated app archive");
        pos += 4;
        let name = core::str::from_utf8(&APP_IMAGE[pos..pos + name_len])
            .expect("app name is not UTF-8");
        pos += name_len;
        let elf_len = read_u32(APP_IMAGE, pos).expect("truncated app archive");
        pos += 4;
        let elf = &APP_IMAGE[pos..pos + elf_len];
        pos += elf_len;

        let header = elf::file_header(elf)
            .unwrap_or_else(|| panic!("invalid elf header: {name}"));
        assert_eq!(
            header.phentsize as usize,
            size_of::<elf::ProgramHeader>(),
            "invalid program header size: {name}"
        );
        apps.push(UserApp { name, elf });
    }

    if apps.is_empty() {
        crate::log_warn!("no user applications embedded");
    } else {
        crate::log_info!("applist:");
        for app in &apps {
            crate::log_info!("\t{} ({} bytes)", app.name, app.elf.len());
        }
    }
    APPS.init(apps);
}

/// Looks an application up by name.
pub fn get(name: &str) -> Result<&'static UserApp, KernelError> {
    APPS.get()
        .iter()
        .find(|app| app.name == name)
        .ok_or(KernelError::AppNotFound)
}
