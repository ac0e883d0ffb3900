//! zerg-interchange 独立交换机进程
//!
//! 绑定客户端与工作节点端口, 以JSON在stdout输出地址供启动器读取,
//! 之后一直运行到进程被终止。

use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{error, LevelFilter};
use zerg_interchange::{Interchange, InterchangeConfig};

#[derive(Parser)]
#[command(name = "zerg-interchange")]
#[command(about = "Batching, load-balancing broker between executors and worker pools", long_about = None)]
struct Args {
    /// JSON配置文件(缺失字段使用默认值)
    #[arg(long)]
    config: Option<PathBuf>,

    /// 开启调试日志
    #[arg(long)]
    debug: bool,

    /// 按每节点任务数输出工作节点池启动命令
    #[arg(long, value_name = "TASKS_PER_NODE")]
    print_launch_cmd: Option<usize>,
}

fn main() {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if args.debug {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    let config = match &args.config {
        Some(path) => InterchangeConfig::from_file(path),
        None => {
            let config = InterchangeConfig::default();
            config.validate().map(|()| config)
        }
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(2);
        }
    };

    let mut interchange = match Interchange::bind(config.clone()) {
        Ok(interchange) => interchange,
        Err(e) => {
            error!("Failed to start interchange: {}", e);
            process::exit(1);
        }
    };

    match serde_json::to_string(interchange.endpoints()) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("Failed to serialize endpoints: {}", e);
            process::exit(1);
        }
    }
    if let Some(tasks_per_node) = args.print_launch_cmd {
        println!("{}", config.launch_command(interchange.endpoints(), tasks_per_node));
    }

    if let Err(e) = interchange.run(None) {
        error!("Interchange stopped: {}", e);
        process::exit(1);
    }
}
