use clap::{Parser, Subcommand};
use client::multicast::MulticastListener;
use client::network::Client;
use log::{info, warn};
use shared::{Scores, DEFAULT_MULTICAST_GROUP, DEFAULT_MULTICAST_PORT, DEFAULT_TCP_PORT};
use std::net::Ipv4Addr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_TCP_PORT))]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new account
    Register { username: String, password: String },

    /// Show one hotel
    Search { name: String, city: String },

    /// List the hotels of a city, best first
    List { city: String },

    /// Log in, submit a review and show the resulting badge
    Review {
        username: String,
        password: String,
        hotel: String,
        city: String,
        /// Overall rate, 0 to 5
        rate: u8,
        cleaning: u8,
        position: u8,
        services: u8,
        quality: u8,
    },

    /// Log in and show your badge
    Badge { username: String, password: String },

    /// Follow ranking changes of some cities until interrupted
    Watch {
        username: String,
        password: String,
        #[arg(required = true)]
        cities: Vec<String>,
        /// Multicast group of the top hotel announcements
        #[arg(long, default_value = DEFAULT_MULTICAST_GROUP)]
        group: Ipv4Addr,
        #[arg(long, default_value_t = DEFAULT_MULTICAST_PORT)]
        multicast_port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let mut client = Client::connect(args.server.as_str()).await?;

    match args.command {
        Command::Register { username, password } => {
            println!("{}", client.register(&username, &password).await?);
        }
        Command::Search { name, city } => {
            println!("{}", client.search_hotel(&name, &city).await?);
        }
        Command::List { city } => {
            for hotel in client.search_all_hotels(&city).await? {
                println!("{}\n", hotel);
            }
        }
        Command::Review {
            username,
            password,
            hotel,
            city,
            rate,
            cleaning,
            position,
            services,
            quality,
        } => {
            client.login(&username, &password).await?;
            let scores = Scores::new(cleaning, position, services, quality);
            println!("{}", client.insert_review(&hotel, &city, rate, scores).await?);
            println!("Badge: {}", client.show_badge().await?);
            client.logout().await?;
        }
        Command::Badge { username, password } => {
            client.login(&username, &password).await?;
            println!("Badge: {}", client.show_badge().await?);
            client.logout().await?;
        }
        Command::Watch {
            username,
            password,
            cities,
            group,
            multicast_port,
        } => {
            client.login(&username, &password).await?;
            let listener = MulticastListener::join(group, multicast_port).await?;
            let cities: Vec<&str> = cities.iter().map(String::as_str).collect();
            println!("{}", client.subscribe(&cities).await?);

            let announcements = tokio::spawn(async move {
                loop {
                    match listener.recv_announcement().await {
                        Ok((city, hotel)) => println!("New top hotel in {}: {}", city, hotel),
                        Err(e) => {
                            warn!("Multicast receive failed: {}", e);
                            break;
                        }
                    }
                }
            });

            loop {
                tokio::select! {
                    update = client.next_rank_update() => {
                        let rank = update?;
                        println!("Ranking of {}:", rank.city);
                        for hotel in &rank.hotels {
                            println!("  {}. {} ({:.2})", hotel.local_rank, hotel.name, hotel.rank);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, leaving...");
                        break;
                    }
                }
            }

            // Closing the connection logs out and drops the subscription.
            announcements.abort();
        }
    }

    Ok(())
}
