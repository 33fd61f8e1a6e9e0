mod cli;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use cli::Cli;
use ext2::{Ext2, FormatOptions, MountOptions};
use ext2_fuse::BlockFile;
use typed_bytesize::ByteSizeIec;
use vfs::{Credentials, FileSystem};

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as u32)
}

fn fs_error(err: vfs::Error) -> io::Error {
    io::Error::other(err.to_string())
}

fn main() -> io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    println!("source={:?}\ntarget={:?}", cli.source, cli.target);

    let disk_size = ByteSizeIec::mib(cli.size).0;
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(cli.out_dir.join("fs.img"))?;
    fd.set_len(disk_size)?;
    let block_file = Arc::new(BlockFile::new(fd));

    let blocks = u32::try_from(disk_size / cli.block_size as u64)
        .map_err(|_| io::Error::other("image too large"))?;
    let mut opts = FormatOptions::new(cli.block_size, blocks).volume_name("rcore");
    opts.now = now();
    Ext2::format(&*block_file, &opts).map_err(fs_error)?;

    let fs = Ext2::mount(block_file, MountOptions::default().with_clock(now)).map_err(fs_error)?;
    let root = fs.root();

    let apps = fs::read_dir(&cli.source)?
        .map(|app| {
            app.map(|app| {
                app.file_name()
                    .to_str()
                    .and_then(|fname| fname.split_once('.'))
                    .expect("source file name doesn't match `*.rs`")
                    .0
                    .to_owned()
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    for app in apps {
        log::info!("app={app:?}");
        let mut host_file = File::open(cli.target.join(&app))?;
        let mut elf_data: Vec<u8> = Vec::new();
        host_file.read_to_end(&mut elf_data)?;

        let inode = fs
            .create(root, &app, 0o755, Credentials::ROOT)
            .map_err(fs_error)?;
        fs.write_at(inode, 0, &elf_data).map_err(fs_error)?;
    }

    {
        let vol = fs.lock();
        let sb = vol.super_block();
        log::info!(
            "{} of {} blocks free, {} of {} inodes free",
            sb.free_blocks_count,
            sb.blocks_count,
            sb.free_inodes_count,
            sb.inodes_count
        );
    }
    fs.unmount().map_err(fs_error)
}
