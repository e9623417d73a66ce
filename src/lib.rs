//! PowerPC模拟器的断点与内存断点调试核心

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use crate::const_values::EmuConfig;
use crate::debugger::{
    BreakpointPanel, Column, DebugContext, EditOutcome, Expression, Row, StoreError, parse_hex,
};
use crate::emulator::{Emulator, State};
use crate::symbols::SymbolMap;
use crate::utils::PpcDisassembler;

pub mod const_values;
pub mod debugger;
pub mod emulator;
pub mod symbols;
pub mod utils;

/// PowerPC 断点管理
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "profile/config.toml")]
    pub config: PathBuf,

    /// 游戏ID，决定断点文件 <game_id>.ini
    #[arg(short, long)]
    pub game: Option<String>,

    /// 符号文件 (ELF 或 .map)
    #[arg(short, long)]
    pub symbols: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 列出全部断点
    List,
    /// 添加指令断点
    AddBp {
        /// 十六进制地址或符号名
        address: String,
        /// 命中中断后删除
        #[arg(long)]
        temporary: bool,
        /// 命中时不中断
        #[arg(long)]
        no_break: bool,
        /// 命中时不记录
        #[arg(long)]
        no_log: bool,
        #[arg(long)]
        condition: Option<String>,
    },
    /// 添加内存断点，未指定 --read/--write 时读写都监视
    AddMbp {
        start: String,
        /// 结束地址（含），缺省为单地址
        end: Option<String>,
        #[arg(long)]
        read: bool,
        #[arg(long)]
        write: bool,
        #[arg(long)]
        no_break: bool,
        #[arg(long)]
        no_log: bool,
        #[arg(long)]
        condition: Option<String>,
    },
    /// 删除断点
    Remove { address: String },
    /// 切换断点启用状态
    Toggle { address: String },
    /// 清空全部断点
    Clear,
    /// 在空白CPU状态上求值条件表达式
    Eval { expression: String },
    /// 加载ELF并运行到第一个中断或程序结束
    Run {
        elf: PathBuf,
        #[arg(long, default_value_t = 10_000_000)]
        max_steps: usize,
    },
}

fn report(outcome: &EditOutcome) {
    match outcome {
        EditOutcome::Applied => println!("{}", "完成".green()),
        EditOutcome::ConditionDropped(e) => {
            println!("{} 条件无法解析 ({e})，断点已按无条件添加", "警告:".yellow().bold())
        }
        EditOutcome::Unchanged => println!("{}", "未修改".dimmed()),
        EditOutcome::NotFound => println!("{}", "断点不存在".red()),
    }
}

fn print_rows(rows: &[Row]) {
    if rows.is_empty() {
        println!("{}", "没有断点".dimmed());
        return;
    }
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| Column::ALL.iter().map(|&col| row.cell(col)).collect())
        .collect();
    let widths: Vec<usize> = Column::ALL
        .iter()
        .enumerate()
        .map(|(i, col)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(col.header().len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header: Vec<String> = Column::ALL
        .iter()
        .zip(&widths)
        .map(|(col, &w)| format!("{:<w$}", col.header()))
        .collect();
    println!("{}", header.join("  ").bold());

    for (row, line) in rows.iter().zip(cells) {
        let text: Vec<String> = line
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{:<w$}", cell))
            .collect();
        let text = text.join("  ");
        if row.is_enabled {
            println!("{}", text.green());
        } else {
            println!("{}", text.dimmed());
        }
    }
}

/// 地址可以写成十六进制数，也可以写成符号名
fn resolve_address(text: &str, symbols: Option<&SymbolMap>) -> Result<u32, StoreError> {
    parse_hex(text).or_else(|err| {
        symbols
            .and_then(|map| map.address_of(text.trim()))
            .ok_or(err)
    })
}

/// 按地址查找指令断点或内存断点对应的行
fn find_row(panel: &BreakpointPanel, address: u32) -> Option<Row> {
    panel.rows().into_iter().find(|row| row.address == address)
}

pub fn run(args: Args) -> Result<()> {
    let config = EmuConfig::new(&args.config)?;
    let game_id = args
        .game
        .or_else(|| config.settings.default_game_id.clone())
        .ok_or_else(|| anyhow!("未指定游戏ID，请使用 --game 或在配置中设置 default_game_id"))?;
    let settings_path = config.game_settings_path(Path::new(""), &game_id);

    let symbols = args
        .symbols
        .as_deref()
        .map(SymbolMap::load)
        .transpose()?
        .map(Arc::new);

    let ctx = DebugContext::new();
    let mut panel = BreakpointPanel::new(&ctx);
    if let Some(symbols) = &symbols {
        panel = panel.with_symbols(symbols.clone());
    }
    panel.load(&settings_path)?;
    let symbol_map = symbols.as_deref();

    let modified = match args.command {
        Command::List => {
            print_rows(&panel.rows());
            false
        }
        Command::AddBp {
            address,
            temporary,
            no_break,
            no_log,
            condition,
        } => {
            let address = resolve_address(&address, symbol_map)?;
            let outcome = panel.add_bp_with(
                address,
                temporary,
                !no_break,
                !no_log,
                condition.as_deref().unwrap_or(""),
            );
            report(&outcome);
            true
        }
        Command::AddMbp {
            start,
            end,
            read,
            write,
            no_break,
            no_log,
            condition,
        } => {
            let start = resolve_address(&start, symbol_map)?;
            let end = end
                .as_deref()
                .map(|end| resolve_address(end, symbol_map))
                .transpose()?
                .unwrap_or(start);
            let (read, write) = if read || write { (read, write) } else { (true, true) };
            let outcome = panel.add_ranged_mbp(
                start,
                end,
                read,
                write,
                !no_log,
                !no_break,
                condition.as_deref().unwrap_or(""),
            )?;
            report(&outcome);
            true
        }
        Command::Remove { address } => {
            let address = resolve_address(&address, symbol_map)?;
            let removed = find_row(&panel, address).is_some_and(|row| panel.delete(&row));
            report(&if removed { EditOutcome::Applied } else { EditOutcome::NotFound });
            removed
        }
        Command::Toggle { address } => {
            let address = resolve_address(&address, symbol_map)?;
            let outcome = match find_row(&panel, address) {
                Some(row) => panel.on_clicked(&row, Column::Enabled)?,
                None => EditOutcome::NotFound,
            };
            report(&outcome);
            outcome == EditOutcome::Applied
        }
        Command::Clear => {
            panel.clear();
            report(&EditOutcome::Applied);
            true
        }
        Command::Eval { expression } => {
            let expr = Expression::try_parse(&expression)?;
            let state = State::new(config.memory.memory_base, 0x1000)?;
            let value = expr.evaluate_value(&state)?;
            println!("{} = {} ({})", expr.text().bold(), value, value != 0.0);
            false
        }
        Command::Run { elf, max_steps } => {
            let mut emu = Emulator::new(&config, &ctx)?;
            if let Some(symbols) = &symbols {
                emu = emu.with_symbols(symbols.clone());
            }
            emu.load_elf(&elf)?;
            let event = emu.steps(max_steps)?;
            println!("{} {:?}", "事件:".bold(), event);
            let state = emu.get_state_ref();
            print!("{}", state);
            // 停止位置的下一条指令
            if let Ok(code) = state.fetch_instruction(state.get_pc()) {
                let disasm = PpcDisassembler::new()?;
                println!("{}", disasm.disasm_with_details(code, state.get_pc())?);
            }
            for record in emu.hit_log() {
                println!(
                    "  #{:<8} {:?} {:08x} pc={:08x} {}",
                    record.step,
                    record.kind,
                    record.address,
                    record.pc,
                    record.symbol.as_deref().unwrap_or("")
                );
            }
            // 临时断点可能已被删除
            true
        }
    };

    if modified {
        panel.save(&settings_path)?;
        info!(path = %settings_path.display(), "断点文件已更新");
    }
    Ok(())
}
